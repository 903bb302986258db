//! Decryption pipeline: decrypt, decompress and verify in one pass.
//!
//! Failures that prevent recovering the plaintext abort the pipeline and
//! discard any output. Failures of trust (integrity, signature) are recorded
//! in the error set and the plaintext is still returned.

use std::fmt;
use std::io::{Read, Write};

use sequoia_openpgp as openpgp;
use openpgp::crypto::hash::Digest;
use openpgp::packet::{Packet, Tag};
use openpgp::parse::{PacketParser, PacketParserResult, Parse};
use tracing::{debug, info, warn};

use crate::keys::{PublicKey, SecretKey};
use crate::status::{CoderError, ErrorSet, Signing};
use crate::stream::{pump, CancelToken, PipelineOptions, PumpError};

/// Outcome of a streaming decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineResult {
    /// The literal data was recovered completely.
    pub decrypted: bool,
    pub signing: Signing,
    pub errors: ErrorSet,
    /// Plaintext bytes written to the output.
    pub bytes: u64,
}

/// Outcome of an in-memory decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// `None` when the pipeline aborted.
    pub plaintext: Option<Vec<u8>>,
    pub signing: Signing,
    pub errors: ErrorSet,
}

/// Marker for an aborted pipeline; the reason is already recorded.
struct Abort;

struct State {
    result: PipelineResult,
}

impl State {
    fn record(&mut self, error: CoderError, reason: impl fmt::Display) {
        warn!(error = ?error, %reason, "decryption problem");
        self.result.errors.insert(error);
    }

    fn abort(&mut self, error: CoderError, reason: impl fmt::Display) -> Abort {
        self.record(error, reason);
        Abort
    }

    fn expect<'a>(&mut self, ppr: PacketParserResult<'a>) -> Result<PacketParser<'a>, Abort> {
        match ppr {
            PacketParserResult::Some(pp) => Ok(pp),
            PacketParserResult::EOF(_) => Err(self.abort(CoderError::InvalidData, "unexpected end of message")),
        }
    }
}

/// Decrypt `input` with the local encryption key and verify it against the
/// sender's signing key, streaming the plaintext into `output`.
///
/// Never fails outright: the returned [`PipelineResult`] tells whether the
/// plaintext was recovered and which problems were found. When `decrypted`
/// is false, whatever was written to `output` must be discarded.
///
/// # Arguments
/// * `my_key` - Unlocked local encryption key
/// * `sender_key` - Sender's signing key; without it a signature is
///   reported as signed but unverified
pub fn decrypt_and_verify<R, W>(
    input: R,
    output: &mut W,
    my_key: &SecretKey,
    sender_key: Option<&PublicKey>,
    options: &PipelineOptions,
    cancel: &CancelToken,
) -> PipelineResult
where
    R: Read + Send + Sync,
    W: Write + ?Sized,
{
    let mut state = State {
        result: PipelineResult {
            decrypted: false,
            signing: Signing::Not,
            errors: ErrorSet::empty(),
            bytes: 0,
        },
    };
    if run(input, output, my_key, sender_key, options, cancel, &mut state).is_ok() {
        info!(signing = ?state.result.signing, errors = state.result.errors.len(), "message decrypted");
    }
    state.result
}

fn run<R, W>(
    input: R,
    output: &mut W,
    my_key: &SecretKey,
    sender_key: Option<&PublicKey>,
    options: &PipelineOptions,
    cancel: &CancelToken,
    state: &mut State,
) -> Result<(), Abort>
where
    R: Read + Send + Sync,
    W: Write + ?Sized,
{
    let mut ppr = PacketParser::from_reader(input).map_err(|e| state.abort(CoderError::InvalidData, e))?;

    // Session key packets up to the encrypted container. Marker packets are skipped.
    let mut pkesks = Vec::new();
    let mut pp = loop {
        let pp = state.expect(ppr)?;
        match pp.packet.tag() {
            Tag::SEIP => break pp,
            Tag::SED => {
                state.record(CoderError::NoIntegrity, "encrypted data without integrity protection");
                return Err(state.abort(CoderError::InvalidData, "refusing unprotected encrypted data"));
            }
            Tag::PKESK | Tag::Marker => {
                let (packet, next) = pp.next().map_err(|e| state.abort(CoderError::InvalidData, e))?;
                if let Packet::PKESK(pkesk) = packet {
                    pkesks.push(pkesk);
                }
                ppr = next;
            }
            other => {
                return Err(state.abort(CoderError::InvalidData, format_args!("unexpected {other} packet")));
            }
        }
    };

    let my_keyid = my_key.keyid();
    let pkesk = pkesks
        .iter()
        .find(|p| *p.recipient() == my_keyid)
        .ok_or_else(|| state.abort(CoderError::InvalidPrivateKey, "message not encrypted for the local key"))?;

    let mut keypair = my_key
        .clone()
        .into_keypair()
        .map_err(|e| state.abort(CoderError::UnknownError, e))?;
    let (algo, session_key) = pkesk
        .decrypt(&mut keypair, None)
        .ok_or_else(|| state.abort(CoderError::InvalidData, "unable to recover session key"))?;
    pp.decrypt(algo, &session_key)
        .map_err(|e| state.abort(CoderError::InvalidData, e))?;

    let (_, next) = pp.recurse().map_err(|e| state.abort(CoderError::InvalidData, e))?;
    pp = state.expect(next)?;

    if pp.packet.tag() == Tag::CompressedData {
        let (_, next) = pp.recurse().map_err(|e| state.abort(CoderError::InvalidData, e))?;
        pp = state.expect(next)?;
    }

    let mut ops_algo = None;
    let mut hash = None;
    if let Packet::OnePassSig(ops) = &pp.packet {
        state.result.signing = Signing::Signed;
        ops_algo = Some(ops.hash_algo());
        if sender_key.is_some() {
            match ops.hash_algo().context() {
                Ok(ctx) => hash = Some(ctx),
                Err(e) => state.record(CoderError::InvalidSignatureData, e),
            }
        }
        let (_, next) = pp.recurse().map_err(|e| state.abort(CoderError::InvalidData, e))?;
        pp = state.expect(next)?;
    }

    if pp.packet.tag() != Tag::Literal {
        return Err(state.abort(
            CoderError::InvalidData,
            format_args!("expected literal data, found {}", pp.packet.tag()),
        ));
    }

    let copied = pump(&mut pp, output, options.buffer_size, cancel, |chunk| {
        if let Some(hash) = hash.as_mut() {
            hash.update(chunk);
        }
    });
    match copied {
        Ok(n) => state.result.bytes = n,
        Err(PumpError::Cancelled) => return Err(state.abort(CoderError::UnknownError, "cancelled")),
        Err(PumpError::Write(e)) => return Err(state.abort(CoderError::UnknownError, e)),
        Err(PumpError::Read(e)) => return Err(state.abort(CoderError::InvalidData, e)),
    }
    state.result.decrypted = true;

    // Trailing signature and modification detection code.
    let mut signature_seen = false;
    let mut mdc_valid = None;
    let mut ppr = match pp.recurse() {
        Ok((_, next)) => next,
        Err(e) => {
            state.record(CoderError::InvalidData, e);
            state.record(CoderError::InvalidIntegrity, "integrity not verifiable");
            return Ok(());
        }
    };
    while let PacketParserResult::Some(pp) = ppr {
        let (packet, next) = match pp.recurse() {
            Ok(r) => r,
            Err(e) => {
                state.record(CoderError::InvalidData, e);
                break;
            }
        };
        ppr = next;

        match packet {
            Packet::Signature(sig) if !signature_seen => {
                signature_seen = true;
                if ops_algo.is_none() {
                    debug!("signature without one-pass header, ignoring");
                    continue;
                }
                if ops_algo != Some(sig.hash_algo()) {
                    state.record(CoderError::InvalidSignatureData, "signature hash algorithm mismatch");
                    continue;
                }
                match (sender_key, hash.take()) {
                    (Some(key), Some(hash)) => match sig.verify_hash(key, hash) {
                        Ok(()) => state.result.signing = Signing::Verified,
                        Err(e) => state.record(CoderError::InvalidSignature, e),
                    },
                    // Unverifiable: stays signed.
                    _ => {}
                }
            }
            Packet::MDC(mdc) => mdc_valid = Some(mdc.valid()),
            other if other.tag() == Tag::Signature && !signature_seen => {
                signature_seen = true;
                if ops_algo.is_some() {
                    state.record(CoderError::InvalidSignatureData, "malformed signature packet");
                }
            }
            other => debug!(tag = %other.tag(), "ignoring trailing packet"),
        }
    }

    if ops_algo.is_some() && !signature_seen {
        state.record(CoderError::InvalidSignatureData, "one-pass signature without signature");
    }
    for error in integrity_errors(mdc_valid) {
        state.record(*error, "modification detection code missing or mismatched");
    }

    Ok(())
}

/// Flags for the modification detection code outcome; `None` if it was
/// never seen.
fn integrity_errors(mdc_valid: Option<bool>) -> &'static [CoderError] {
    match mdc_valid {
        Some(true) => &[],
        Some(false) => &[CoderError::InvalidIntegrity],
        None => &[CoderError::NoIntegrity, CoderError::InvalidIntegrity],
    }
}

/// In-memory variant of [`decrypt_and_verify`]. The plaintext is dropped
/// when the pipeline aborts.
pub fn decrypt_message(
    ciphertext: &[u8],
    my_key: &SecretKey,
    sender_key: Option<&PublicKey>,
    options: &PipelineOptions,
) -> DecryptedMessage {
    let mut plaintext = Vec::new();
    let result = decrypt_and_verify(
        ciphertext,
        &mut plaintext,
        my_key,
        sender_key,
        options,
        &CancelToken::new(),
    );
    DecryptedMessage {
        plaintext: result.decrypted.then_some(plaintext),
        signing: result.signing,
        errors: result.errors,
    }
}
