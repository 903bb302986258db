//! Attachment file encryption.
//!
//! Attachments are encrypted as raw bytes without an envelope. Output goes
//! through a [`NamedTempFile`] so an aborted run never leaves a partial file
//! behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use kon_crypto::decrypt::decrypt_and_verify;
use kon_crypto::encrypt::{encrypt_and_sign, Sender};
use kon_crypto::keys::PublicKey;
use kon_crypto::status::{CoderError, CoderStatus};
use kon_crypto::stream::CancelToken;
use tempfile::{Builder, NamedTempFile};
use tracing::{info, warn};

use crate::coder::{Coder, ContactRecord};
use crate::errors::CoreError;

const ENCRYPTED_PREFIX: &str = "kon_enc_att";
const ENCRYPTED_SUFFIX: &str = ".dat";
const DECRYPTED_MARKER: &str = "_dec";

/// Result of decrypting an attachment.
#[derive(Debug, Clone)]
pub struct AttachmentOutcome {
    /// Decrypted file; `None` when decryption failed
    pub path: Option<PathBuf>,
    pub status: CoderStatus,
}

impl Coder {
    /// Encrypt the file at `source` for `recipients`.
    ///
    /// The ciphertext is written to a new file in the configured temporary
    /// directory whose path is returned. The source is left untouched.
    pub fn encrypt_attachment(
        &self,
        source: &Path,
        recipients: &[ContactRecord],
        cancel: &CancelToken,
    ) -> Result<PathBuf, CoreError> {
        let my_key = self.my_key()?;
        let keys = self.recipient_keys(recipients)?;
        let encryption_keys: Vec<&PublicKey> = keys.iter().map(|k| k.encryption_key()).collect();

        let mut input = File::open(source)?;
        let mut staged = Builder::new()
            .prefix(ENCRYPTED_PREFIX)
            .suffix(ENCRYPTED_SUFFIX)
            .tempfile_in(&self.config().temp_dir)?;

        let sender = Sender {
            key: my_key.signing_key(),
            user_id: my_key.user_id(),
        };
        let bytes = encrypt_and_sign(
            &mut input,
            staged.as_file_mut(),
            sender,
            &encryption_keys,
            &self.config().pipeline_options(),
            cancel,
        )?;
        staged.as_file_mut().flush()?;
        staged.as_file().sync_all()?;

        let (_, path) = staged.keep().map_err(|e| CoreError::Io(e.error))?;
        info!(bytes, recipients = keys.len(), "attachment encrypted");
        Ok(path)
    }

    /// Decrypt the file at `source`, received from `sender`.
    ///
    /// The plaintext is written beside the source as `<base>_dec.<ext>`,
    /// where the extension follows `declared_mime` when it is known. An
    /// existing file of that name is never replaced. The source is removed
    /// once the plaintext is in place.
    pub fn decrypt_attachment(
        &self,
        source: &Path,
        declared_mime: Option<&str>,
        sender: &ContactRecord,
        cancel: &CancelToken,
    ) -> AttachmentOutcome {
        let mut status = CoderStatus::incoming();

        let my_key = match self.my_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "cannot decrypt attachment");
                status.errors.extend_from(e.security_errors());
                return AttachmentOutcome { path: None, status };
            }
        };
        let sender_key = self.sender_key(sender, &mut status);

        let destination = decrypted_path(source, declared_mime);
        if destination.exists() {
            let e = CoreError::DestinationExists(destination.display().to_string());
            warn!(error = %e, "refusing to overwrite");
            status.errors.extend_from(e.security_errors());
            return AttachmentOutcome { path: None, status };
        }

        let staged = File::open(source).and_then(|input| {
            let dir = source.parent().unwrap_or_else(|| Path::new("."));
            let staged = NamedTempFile::new_in(dir)?;
            Ok((input, staged))
        });
        let (input, mut staged) = match staged {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "cannot open attachment files");
                status.add_error(CoderError::UnknownError);
                return AttachmentOutcome { path: None, status };
            }
        };

        let result = decrypt_and_verify(
            input,
            staged.as_file_mut(),
            my_key.encryption_key(),
            sender_key.as_deref().map(|k| k.signing_key()),
            &self.config().pipeline_options(),
            cancel,
        );
        status.errors.extend_from(result.errors);
        status.set_signing(result.signing);
        if !result.decrypted {
            return AttachmentOutcome { path: None, status };
        }
        status.set_decrypted();

        if let Err(e) = staged.as_file().sync_all() {
            warn!(error = %e, "cannot flush decrypted attachment");
            status.add_error(CoderError::UnknownError);
            return AttachmentOutcome { path: None, status };
        }
        if let Err(e) = staged.persist_noclobber(&destination) {
            warn!(error = %e.error, "cannot move decrypted attachment into place");
            status.add_error(CoderError::UnknownError);
            return AttachmentOutcome { path: None, status };
        }

        if let Err(e) = fs::remove_file(source) {
            warn!(error = %e, "cannot remove encrypted attachment");
        }

        info!(bytes = result.bytes, "attachment decrypted");
        AttachmentOutcome {
            path: Some(destination),
            status,
        }
    }
}

/// `<dir>/<base>_dec.<ext>` for an encrypted file at `source`.
fn decrypted_path(source: &Path, declared_mime: Option<&str>) -> PathBuf {
    let base = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let current = source.extension().and_then(|e| e.to_str());

    let extension = match declared_mime.and_then(mime_guess::get_mime_extensions_str) {
        Some(known) => match current {
            Some(ext) if known.iter().any(|k| k.eq_ignore_ascii_case(ext)) => Some(ext),
            _ => known.first().copied(),
        },
        None => current,
    };

    let name = match extension {
        Some(ext) => format!("{base}{DECRYPTED_MARKER}.{ext}"),
        None => format!("{base}{DECRYPTED_MARKER}"),
    };
    source.with_file_name(name)
}
