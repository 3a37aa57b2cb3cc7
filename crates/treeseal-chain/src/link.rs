//! Link types and their canonical line encoding.
//!
//! Every link is stored as one line:
//!
//! ```text
//! <previous> <datum> <type> <fields...> [comment]
//! ```
//!
//! Keys, signatures and digests are lowercase hex; the free-text comment,
//! when present, is always the last field and may contain spaces. The
//! link's identity is `blake3(line)`.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use treeseal_types::{LinkHash, TreeHash, decode_hex_array};

use crate::error::{ChainError, LinkParseError};

/// Size of the random nonce in a chain-start link.
pub const NONCE_SIZE: usize = 24;

/// Placeholder rendered in place of a signature in the signing payload.
const BLANK: &str = "-";

/// A signature by a key authorized at the link's chain position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endorsement {
    /// Public key of the endorsing signer.
    pub signer: VerifyingKey,
    /// Signature over [`Link::signing_payload`].
    pub signature: Signature,
}

impl Endorsement {
    fn placeholder(signer: VerifyingKey) -> Self {
        Self {
            signer,
            signature: Signature::from_bytes(&[0u8; 64]),
        }
    }
}

/// The typed payload of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// First link of every chain; authorizes `pubkey` with threshold 1.
    ChainStart {
        /// The first authorized key.
        pubkey: VerifyingKey,
        /// Random nonce making every chain unique.
        nonce: [u8; NONCE_SIZE],
        /// Self-signature over `pubkey ++ nonce ++ comment`.
        signature: Signature,
        /// Optional free text.
        comment: Option<String>,
    },
    /// Adds a key to the signature control list.
    AddKey {
        /// The key being added.
        pubkey: VerifyingKey,
        /// Proof of possession by the added key over `pubkey ++ comment`.
        pubkey_signature: Signature,
        /// Endorsement by an already authorized key.
        endorsement: Endorsement,
        /// Optional free text.
        comment: Option<String>,
    },
    /// Removes a key from the signature control list.
    RemoveKey {
        /// The key being removed.
        pubkey: VerifyingKey,
        /// Endorsement by an authorized key.
        endorsement: Endorsement,
    },
    /// Sets the quorum threshold.
    SetThreshold {
        /// New number of signatures required for approval.
        m: usize,
        /// Endorsement by an authorized key.
        endorsement: Endorsement,
    },
    /// Introduces a tree hash into history with no signatures.
    RecordTree {
        /// The recorded tree hash.
        tree_hash: TreeHash,
        /// Endorsement by an authorized key.
        endorsement: Endorsement,
        /// Optional free text (release notes).
        comment: Option<String>,
    },
    /// One signature towards approving a recorded tree hash.
    SignTree {
        /// The tree hash being signed.
        tree_hash: TreeHash,
        /// The signature; the signer counts towards the quorum.
        endorsement: Endorsement,
    },
    /// Free-text annotation.
    Comment {
        /// Endorsement by an authorized key.
        endorsement: Endorsement,
        /// The text.
        text: String,
    },
}

impl LinkKind {
    /// The type tag used in the canonical encoding.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ChainStart { .. } => "cstart",
            Self::AddKey { .. } => "addkey",
            Self::RemoveKey { .. } => "remkey",
            Self::SetThreshold { .. } => "sigctl",
            Self::RecordTree { .. } => "source",
            Self::SignTree { .. } => "signtr",
            Self::Comment { .. } => "comment",
        }
    }

    /// The endorsement carried by every non-genesis link.
    pub fn endorsement(&self) -> Option<&Endorsement> {
        match self {
            Self::ChainStart { .. } => None,
            Self::AddKey { endorsement, .. }
            | Self::RemoveKey { endorsement, .. }
            | Self::SetThreshold { endorsement, .. }
            | Self::RecordTree { endorsement, .. }
            | Self::SignTree { endorsement, .. }
            | Self::Comment { endorsement, .. } => Some(endorsement),
        }
    }

    fn endorsement_mut(&mut self) -> Option<&mut Endorsement> {
        match self {
            Self::ChainStart { .. } => None,
            Self::AddKey { endorsement, .. }
            | Self::RemoveKey { endorsement, .. }
            | Self::SetThreshold { endorsement, .. }
            | Self::RecordTree { endorsement, .. }
            | Self::SignTree { endorsement, .. }
            | Self::Comment { endorsement, .. } => Some(endorsement),
        }
    }
}

/// A single immutable entry of the hash chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Hash of the preceding link (the empty-tree sentinel for genesis).
    pub previous: LinkHash,
    /// Unix timestamp in seconds. Advisory only.
    pub datum: u64,
    /// The typed payload.
    pub kind: LinkKind,
}

/// Message signed by a key to prove possession before being added.
pub fn key_possession_message(pubkey: &VerifyingKey, comment: Option<&str>) -> Vec<u8> {
    let mut msg = pubkey.as_bytes().to_vec();
    if let Some(c) = comment {
        msg.extend_from_slice(c.as_bytes());
    }
    msg
}

/// Sign the proof-of-possession message for `signing_key`.
pub fn sign_key_possession(signing_key: &SigningKey, comment: Option<&str>) -> Signature {
    signing_key.sign(&key_possession_message(&signing_key.verifying_key(), comment))
}

fn genesis_message(
    pubkey: &VerifyingKey,
    nonce: &[u8; NONCE_SIZE],
    comment: Option<&str>,
) -> Vec<u8> {
    let mut msg = pubkey.as_bytes().to_vec();
    msg.extend_from_slice(nonce);
    if let Some(c) = comment {
        msg.extend_from_slice(c.as_bytes());
    }
    msg
}

/// Map an empty comment to `None`; reject line breaks.
fn normalize_comment(comment: Option<&str>) -> Result<Option<String>, ChainError> {
    match comment {
        None | Some("") => Ok(None),
        Some(c) if c.contains(['\n', '\r']) => Err(ChainError::InvalidText(
            "comment must not contain line breaks".into(),
        )),
        Some(c) => Ok(Some(c.to_string())),
    }
}

impl Link {
    /// Create a signed chain-start link.
    pub fn chain_start(
        datum: u64,
        signing_key: &SigningKey,
        nonce: [u8; NONCE_SIZE],
        comment: Option<&str>,
    ) -> Result<Self, ChainError> {
        let comment = normalize_comment(comment)?;
        let pubkey = signing_key.verifying_key();
        let signature = signing_key.sign(&genesis_message(&pubkey, &nonce, comment.as_deref()));
        Ok(Self {
            previous: LinkHash::genesis_previous(),
            datum,
            kind: LinkKind::ChainStart {
                pubkey,
                nonce,
                signature,
                comment,
            },
        })
    }

    /// Create an `addkey` link endorsed by `signer`.
    ///
    /// `pubkey_signature` must come from the added key's holder, see
    /// [`sign_key_possession`].
    pub fn add_key(
        previous: LinkHash,
        datum: u64,
        pubkey: VerifyingKey,
        pubkey_signature: Signature,
        comment: Option<&str>,
        signer: &SigningKey,
    ) -> Result<Self, ChainError> {
        let comment = normalize_comment(comment)?;
        let kind = LinkKind::AddKey {
            pubkey,
            pubkey_signature,
            endorsement: Endorsement::placeholder(signer.verifying_key()),
            comment,
        };
        Ok(Self::endorsed(previous, datum, kind, signer))
    }

    /// Create a `remkey` link endorsed by `signer`.
    pub fn remove_key(
        previous: LinkHash,
        datum: u64,
        pubkey: VerifyingKey,
        signer: &SigningKey,
    ) -> Self {
        let kind = LinkKind::RemoveKey {
            pubkey,
            endorsement: Endorsement::placeholder(signer.verifying_key()),
        };
        Self::endorsed(previous, datum, kind, signer)
    }

    /// Create a `sigctl` link endorsed by `signer`.
    pub fn set_threshold(previous: LinkHash, datum: u64, m: usize, signer: &SigningKey) -> Self {
        let kind = LinkKind::SetThreshold {
            m,
            endorsement: Endorsement::placeholder(signer.verifying_key()),
        };
        Self::endorsed(previous, datum, kind, signer)
    }

    /// Create a `source` link recording `tree_hash`.
    pub fn record_tree(
        previous: LinkHash,
        datum: u64,
        tree_hash: TreeHash,
        comment: Option<&str>,
        signer: &SigningKey,
    ) -> Result<Self, ChainError> {
        let comment = normalize_comment(comment)?;
        let kind = LinkKind::RecordTree {
            tree_hash,
            endorsement: Endorsement::placeholder(signer.verifying_key()),
            comment,
        };
        Ok(Self::endorsed(previous, datum, kind, signer))
    }

    /// Create a `signtr` link: `signer`'s signature over `tree_hash`.
    pub fn sign_tree(
        previous: LinkHash,
        datum: u64,
        tree_hash: TreeHash,
        signer: &SigningKey,
    ) -> Self {
        let kind = LinkKind::SignTree {
            tree_hash,
            endorsement: Endorsement::placeholder(signer.verifying_key()),
        };
        Self::endorsed(previous, datum, kind, signer)
    }

    /// Create a `comment` link.
    pub fn comment(
        previous: LinkHash,
        datum: u64,
        text: &str,
        signer: &SigningKey,
    ) -> Result<Self, ChainError> {
        let Some(text) = normalize_comment(Some(text))? else {
            return Err(ChainError::InvalidText("comment text is empty".into()));
        };
        let kind = LinkKind::Comment {
            endorsement: Endorsement::placeholder(signer.verifying_key()),
            text,
        };
        Ok(Self::endorsed(previous, datum, kind, signer))
    }

    fn endorsed(previous: LinkHash, datum: u64, kind: LinkKind, signer: &SigningKey) -> Self {
        let mut link = Self {
            previous,
            datum,
            kind,
        };
        let signature = signer.sign(link.signing_payload().as_bytes());
        if let Some(endorsement) = link.kind.endorsement_mut() {
            endorsement.signature = signature;
        }
        link
    }

    /// The link's identity: `blake3` of its canonical line.
    pub fn hash(&self) -> LinkHash {
        LinkHash::from_data(self.to_string().as_bytes())
    }

    /// The bytes covered by the endorsement: the canonical line with the
    /// endorsement signature replaced by `-`.
    pub fn signing_payload(&self) -> String {
        self.render(true)
    }

    /// Check the chain-start self-signature. `false` for other kinds.
    pub fn verify_genesis_signature(&self) -> bool {
        let LinkKind::ChainStart {
            pubkey,
            nonce,
            signature,
            comment,
        } = &self.kind
        else {
            return false;
        };
        pubkey
            .verify(&genesis_message(pubkey, nonce, comment.as_deref()), signature)
            .is_ok()
    }

    /// Check the endorsement signature. `false` for chain-start links.
    pub fn verify_endorsement(&self) -> bool {
        let Some(endorsement) = self.kind.endorsement() else {
            return false;
        };
        endorsement
            .signer
            .verify(self.signing_payload().as_bytes(), &endorsement.signature)
            .is_ok()
    }

    /// Check the added key's proof of possession. `false` for other kinds.
    pub fn verify_key_possession(&self) -> bool {
        let LinkKind::AddKey {
            pubkey,
            pubkey_signature,
            comment,
            ..
        } = &self.kind
        else {
            return false;
        };
        pubkey
            .verify(
                &key_possession_message(pubkey, comment.as_deref()),
                pubkey_signature,
            )
            .is_ok()
    }

    fn render(&self, blank_endorsement: bool) -> String {
        let mut fields = vec![
            self.previous.to_string(),
            self.datum.to_string(),
            self.kind.tag().to_string(),
        ];
        let mut trailing: Option<&str> = None;

        match &self.kind {
            LinkKind::ChainStart {
                pubkey,
                nonce,
                signature,
                comment,
            } => {
                fields.push(key_hex(pubkey));
                fields.push(hex::encode(nonce));
                fields.push(hex::encode(signature.to_bytes()));
                trailing = comment.as_deref();
            }
            LinkKind::AddKey {
                pubkey,
                pubkey_signature,
                comment,
                ..
            } => {
                fields.push(key_hex(pubkey));
                fields.push(hex::encode(pubkey_signature.to_bytes()));
                trailing = comment.as_deref();
            }
            LinkKind::RemoveKey { pubkey, .. } => fields.push(key_hex(pubkey)),
            LinkKind::SetThreshold { m, .. } => fields.push(m.to_string()),
            LinkKind::RecordTree {
                tree_hash, comment, ..
            } => {
                fields.push(tree_hash.to_string());
                trailing = comment.as_deref();
            }
            LinkKind::SignTree { tree_hash, .. } => fields.push(tree_hash.to_string()),
            LinkKind::Comment { text, .. } => trailing = Some(text.as_str()),
        }

        if let Some(endorsement) = self.kind.endorsement() {
            fields.push(key_hex(&endorsement.signer));
            if blank_endorsement {
                fields.push(BLANK.to_string());
            } else {
                fields.push(hex::encode(endorsement.signature.to_bytes()));
            }
        }

        if let Some(text) = trailing {
            fields.push(text.to_string());
        }

        fields.join(" ")
    }

    /// Parse a canonical link line.
    ///
    /// The line must re-encode to exactly the same bytes; any alternative
    /// spelling (uppercase hex, padded numbers) is rejected.
    pub fn parse(line: &str) -> Result<Self, LinkParseError> {
        if line.contains(['\n', '\r']) {
            return Err(malformed("line break inside link"));
        }

        let mut head = line.splitn(4, ' ');
        let (Some(previous), Some(datum), Some(tag), Some(rest)) =
            (head.next(), head.next(), head.next(), head.next())
        else {
            return Err(malformed("expected previous, datum, type and fields"));
        };

        let previous: LinkHash = previous
            .parse()
            .map_err(|e| malformed(format!("previous: {e}")))?;
        let datum: u64 = datum
            .parse()
            .map_err(|_| malformed(format!("datum '{datum}' is not a timestamp")))?;

        let kind = match tag {
            "cstart" => {
                let (f, comment) = split_fields(rest, 3, Trailing::Optional)?;
                LinkKind::ChainStart {
                    pubkey: parse_key(f[0])?,
                    nonce: parse_hex(f[1], "nonce")?,
                    signature: parse_signature(f[2])?,
                    comment,
                }
            }
            "addkey" => {
                let (f, comment) = split_fields(rest, 4, Trailing::Optional)?;
                LinkKind::AddKey {
                    pubkey: parse_key(f[0])?,
                    pubkey_signature: parse_signature(f[1])?,
                    endorsement: parse_endorsement(f[2], f[3])?,
                    comment,
                }
            }
            "remkey" => {
                let (f, _) = split_fields(rest, 3, Trailing::None)?;
                LinkKind::RemoveKey {
                    pubkey: parse_key(f[0])?,
                    endorsement: parse_endorsement(f[1], f[2])?,
                }
            }
            "sigctl" => {
                let (f, _) = split_fields(rest, 3, Trailing::None)?;
                LinkKind::SetThreshold {
                    m: f[0]
                        .parse()
                        .map_err(|_| malformed(format!("threshold '{}' is not a number", f[0])))?,
                    endorsement: parse_endorsement(f[1], f[2])?,
                }
            }
            "source" => {
                let (f, comment) = split_fields(rest, 3, Trailing::Optional)?;
                LinkKind::RecordTree {
                    tree_hash: parse_tree_hash(f[0])?,
                    endorsement: parse_endorsement(f[1], f[2])?,
                    comment,
                }
            }
            "signtr" => {
                let (f, _) = split_fields(rest, 3, Trailing::None)?;
                LinkKind::SignTree {
                    tree_hash: parse_tree_hash(f[0])?,
                    endorsement: parse_endorsement(f[1], f[2])?,
                }
            }
            "comment" => {
                let (f, text) = split_fields(rest, 2, Trailing::Required)?;
                LinkKind::Comment {
                    endorsement: parse_endorsement(f[0], f[1])?,
                    text: text.unwrap_or_default(),
                }
            }
            other => return Err(LinkParseError::UnknownType(other.to_string())),
        };

        let link = Self {
            previous,
            datum,
            kind,
        };
        if link.to_string() != line {
            return Err(malformed("non-canonical encoding"));
        }
        Ok(link)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

enum Trailing {
    None,
    Optional,
    Required,
}

fn malformed(reason: impl Into<String>) -> LinkParseError {
    LinkParseError::Malformed(reason.into())
}

/// Split `rest` into `fixed` space-separated fields plus an optional
/// trailing free-text field that keeps its inner spaces.
fn split_fields(
    rest: &str,
    fixed: usize,
    trailing: Trailing,
) -> Result<(Vec<&str>, Option<String>), LinkParseError> {
    let mut parts: Vec<&str> = match trailing {
        Trailing::None => rest.split(' ').collect(),
        Trailing::Optional | Trailing::Required => rest.splitn(fixed + 1, ' ').collect(),
    };

    let text = if parts.len() > fixed {
        parts.pop()
    } else {
        None
    };

    if parts.len() != fixed {
        return Err(malformed(format!(
            "expected {fixed} fields, found {}",
            parts.len()
        )));
    }

    match (trailing, text) {
        (Trailing::None, Some(_)) => Err(malformed("unexpected trailing field")),
        (_, Some("")) => Err(malformed("empty trailing text")),
        (Trailing::Required, None) => Err(malformed("missing text")),
        (_, text) => Ok((parts, text.map(str::to_string))),
    }
}

fn parse_hex<const N: usize>(s: &str, what: &str) -> Result<[u8; N], LinkParseError> {
    decode_hex_array(s).map_err(|e| malformed(format!("{what}: {e}")))
}

fn parse_key(s: &str) -> Result<VerifyingKey, LinkParseError> {
    let bytes = parse_hex::<32>(s, "public key")?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| malformed(format!("public key: {e}")))
}

fn parse_signature(s: &str) -> Result<Signature, LinkParseError> {
    Ok(Signature::from_bytes(&parse_hex::<64>(s, "signature")?))
}

fn parse_tree_hash(s: &str) -> Result<TreeHash, LinkParseError> {
    s.parse().map_err(|e| malformed(format!("tree hash: {e}")))
}

fn parse_endorsement(signer: &str, signature: &str) -> Result<Endorsement, LinkParseError> {
    Ok(Endorsement {
        signer: parse_key(signer)?,
        signature: parse_signature(signature)?,
    })
}

/// Lowercase hex of a public key.
pub fn key_hex(key: &VerifyingKey) -> String {
    hex::encode(key.as_bytes())
}
