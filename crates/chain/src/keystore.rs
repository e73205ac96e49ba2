//! Wallet key loading.
//!
//! The wallets file holds one credential per line, either a raw hex private
//! key or a base64 AES blob produced by the companion encryption tool. The
//! first well-formed line, not merely the first non-empty one, decides which
//! of the two the whole file is: leading garbage is skipped rather than
//! fixing the format. Lines of the other format are then skipped.
//!
//! Keys live in [`KeyHandle`]s that zero their memory on drop. A signer is
//! only materialized for the duration of one signing operation.

use std::fmt;
use std::path::{Path, PathBuf};

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::Aes256;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

/// Passphrase prompts before giving up with `WrongPassword`.
pub const DEFAULT_PASSPHRASE_ATTEMPTS: u32 = 3;

const AES_BLOCK: usize = 16;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("wallets file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("wallets file is empty: {0}")]
    EmptyFile(PathBuf),

    #[error("wrong passphrase")]
    WrongPassword,

    #[error("no usable credentials in {0}")]
    UnrecognizedFormat(PathBuf),

    #[error("passphrase unavailable: {0}")]
    Passphrase(String),

    #[error("failed to read wallets file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid private key: {0}")]
    InvalidKey(String),
}

/// 32-byte secp256k1 secret, zeroed on drop.
#[derive(Clone)]
pub struct KeyHandle(Zeroizing<[u8; 32]>);

impl KeyHandle {
    /// Validate `bytes` as a secp256k1 secret.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyStoreError> {
        if bytes.len() != 32 {
            return Err(KeyStoreError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        PrivateKeySigner::from_slice(bytes).map_err(|e| KeyStoreError::InvalidKey(e.to_string()))?;
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Parse a hex key, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self, KeyStoreError> {
        let digits = s.trim().trim_start_matches("0x");
        if digits.len() != 64 {
            return Err(KeyStoreError::InvalidKey("expected 64 hex characters".into()));
        }
        let bytes = Zeroizing::new(
            hex::decode(digits).map_err(|e| KeyStoreError::InvalidKey(e.to_string()))?,
        );
        Self::from_slice(&bytes)
    }

    /// Short-lived signer for one operation.
    pub fn signer(&self) -> Result<PrivateKeySigner, KeyStoreError> {
        PrivateKeySigner::from_slice(&self.0[..]).map_err(|e| KeyStoreError::InvalidKey(e.to_string()))
    }

    pub fn address(&self) -> Result<Address, KeyStoreError> {
        Ok(self.signer()?.address())
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyHandle(<redacted>)")
    }
}

/// A loaded wallet: checksummed address plus its key handle.
#[derive(Clone)]
pub struct Wallet {
    pub address: Address,
    key: KeyHandle,
}

impl Wallet {
    pub fn new(key: KeyHandle) -> Result<Self, KeyStoreError> {
        Ok(Self {
            address: key.address()?,
            key,
        })
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyStoreError> {
        Self::new(KeyHandle::from_hex(s)?)
    }

    pub fn key(&self) -> &KeyHandle {
        &self.key
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Result of classifying one credential line.
#[derive(Debug)]
pub enum Credential {
    /// 64 hex characters that form a valid secp256k1 secret.
    RawKey(KeyHandle),
    /// Canonical base64 ciphertext.
    EncryptedBlob(Vec<u8>),
    Malformed,
}

impl Credential {
    fn kind(&self) -> Option<FileFormat> {
        match self {
            Self::RawKey(_) => Some(FileFormat::Plain),
            Self::EncryptedBlob(_) => Some(FileFormat::Encrypted),
            Self::Malformed => None,
        }
    }
}

/// Format of a wallets file, fixed by its first well-formed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Plain,
    Encrypted,
}

/// Classify a credential line.
///
/// A valid raw key wins over the base64 check: every 64-character hex
/// string is also valid base64.
pub fn classify_credential(line: &str) -> Credential {
    let line = line.trim();
    if line.is_empty() {
        return Credential::Malformed;
    }

    let digits = line.strip_prefix("0x").unwrap_or(line);
    if digits.len() == 64 {
        if let Ok(key) = KeyHandle::from_hex(digits) {
            return Credential::RawKey(key);
        }
    }

    match STANDARD.decode(line) {
        Ok(decoded) if !decoded.is_empty() && STANDARD.encode(&decoded) == line => {
            Credential::EncryptedBlob(decoded)
        }
        _ => Credential::Malformed,
    }
}

/// Derive the AES-256 key for `passphrase`.
fn derive_key(passphrase: &str) -> Zeroizing<[u8; 32]> {
    let salt = Sha256::digest(passphrase.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), &salt, 1, &mut key[..]);
    key
}

/// Decrypt one blob.
///
/// Any padding, length or key-validity failure is reported as
/// `WrongPassword`: with ECB and a one-round KDF there is no other signal.
pub fn decrypt_key(blob: &[u8], passphrase: &str) -> Result<KeyHandle, KeyStoreError> {
    if blob.is_empty() || blob.len() % AES_BLOCK != 0 {
        return Err(KeyStoreError::WrongPassword);
    }

    let key = derive_key(passphrase);
    let cipher = Aes256::new(GenericArray::from_slice(&key[..]));
    let mut buf = Zeroizing::new(blob.to_vec());
    for block in buf.chunks_exact_mut(AES_BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let plaintext = strip_pkcs7(&buf).ok_or(KeyStoreError::WrongPassword)?;
    let secret = match plaintext.len() {
        33 => &plaintext[1..],
        32 => plaintext,
        _ => return Err(KeyStoreError::WrongPassword),
    };
    KeyHandle::from_slice(secret).map_err(|_| KeyStoreError::WrongPassword)
}

fn strip_pkcs7(buf: &[u8]) -> Option<&[u8]> {
    let pad = *buf.last()? as usize;
    if pad == 0 || pad > AES_BLOCK || pad > buf.len() {
        return None;
    }
    let (body, padding) = buf.split_at(buf.len() - pad);
    padding.iter().all(|&b| b as usize == pad).then_some(body)
}

/// Supplies the passphrase for encrypted wallet files.
pub trait PassphraseProvider: Send + Sync {
    /// Passphrase for the given (1-based) attempt.
    fn passphrase(&self, attempt: u32) -> Result<Zeroizing<String>, KeyStoreError>;
}

/// Load wallets with the default passphrase attempt budget.
pub fn load_wallets(
    path: &Path,
    passphrase: &dyn PassphraseProvider,
) -> Result<Vec<Wallet>, KeyStoreError> {
    load_wallets_with_attempts(path, passphrase, DEFAULT_PASSPHRASE_ATTEMPTS)
}

/// Load every wallet in `path`.
///
/// Malformed lines and lines of the other format are skipped with a log;
/// one bad line never aborts the rest. An encrypted file asks for the
/// passphrase up to `max_attempts` times; it is accepted once any blob
/// decrypts to a usable key.
pub fn load_wallets_with_attempts(
    path: &Path,
    passphrase: &dyn PassphraseProvider,
    max_attempts: u32,
) -> Result<Vec<Wallet>, KeyStoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(KeyStoreError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<(usize, &str)> = contents
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return Err(KeyStoreError::EmptyFile(path.to_path_buf()));
    }

    let mut format = None;
    let mut credentials = Vec::new();
    for (line_no, line) in lines {
        let credential = classify_credential(line);
        match (credential.kind(), format) {
            (None, _) => warn!(line = line_no, "Skipping malformed credential line"),
            (Some(kind), None) => {
                format = Some(kind);
                credentials.push((line_no, credential));
            }
            (Some(kind), Some(expected)) if kind == expected => {
                credentials.push((line_no, credential));
            }
            (Some(kind), Some(expected)) => error!(
                line = line_no,
                found = ?kind,
                expected = ?expected,
                "Mixed credential formats are not supported, skipping line"
            ),
        }
    }

    let wallets = match format {
        None => return Err(KeyStoreError::UnrecognizedFormat(path.to_path_buf())),
        Some(FileFormat::Plain) => credentials
            .into_iter()
            .filter_map(|(line_no, credential)| match credential {
                Credential::RawKey(key) => to_wallet(line_no, key),
                _ => None,
            })
            .collect(),
        Some(FileFormat::Encrypted) => {
            let blobs: Vec<(usize, Vec<u8>)> = credentials
                .into_iter()
                .filter_map(|(line_no, credential)| match credential {
                    Credential::EncryptedBlob(blob) => Some((line_no, blob)),
                    _ => None,
                })
                .collect();
            decrypt_all(&blobs, passphrase, max_attempts)?
        }
    };

    let wallets = dedup(wallets);
    if wallets.is_empty() {
        return Err(KeyStoreError::UnrecognizedFormat(path.to_path_buf()));
    }
    info!(
        count = wallets.len(),
        format = ?format,
        "Wallets loaded"
    );
    Ok(wallets)
}

fn to_wallet(line_no: usize, key: KeyHandle) -> Option<Wallet> {
    match Wallet::new(key) {
        Ok(wallet) => Some(wallet),
        Err(e) => {
            warn!(line = line_no, error = %e, "Skipping unusable key");
            None
        }
    }
}

/// Decrypt every blob with one passphrase. The passphrase is accepted when
/// at least one blob yields a usable wallet; lines that fail under an
/// accepted passphrase are skipped.
fn decrypt_all(
    blobs: &[(usize, Vec<u8>)],
    passphrase: &dyn PassphraseProvider,
    max_attempts: u32,
) -> Result<Vec<Wallet>, KeyStoreError> {
    if blobs.is_empty() {
        return Ok(Vec::new());
    }

    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let secret = passphrase.passphrase(attempt)?;

        let mut failed = Vec::new();
        let wallets: Vec<Wallet> = blobs
            .iter()
            .filter_map(|(line_no, blob)| match decrypt_key(blob, &secret) {
                Ok(key) => to_wallet(*line_no, key),
                Err(e) => {
                    failed.push((*line_no, e));
                    None
                }
            })
            .collect();

        if wallets.is_empty() {
            warn!(attempt = attempt, max_attempts = max_attempts, "Passphrase rejected");
            continue;
        }
        for (line_no, e) in failed {
            error!(line = line_no, error = %e, "Failed to decrypt credential, skipping");
        }
        return Ok(wallets);
    }
    Err(KeyStoreError::WrongPassword)
}

fn dedup(wallets: Vec<Wallet>) -> Vec<Wallet> {
    let mut seen = std::collections::HashSet::new();
    wallets
        .into_iter()
        .filter(|w| {
            let fresh = seen.insert(w.address);
            if !fresh {
                warn!(wallet = %w.address, "Duplicate wallet ignored");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncrypt;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const KEY_A: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDR_A: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const KEY_B: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const ADDR_B: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    struct Phrases(Vec<&'static str>);

    impl PassphraseProvider for Phrases {
        fn passphrase(&self, attempt: u32) -> Result<Zeroizing<String>, KeyStoreError> {
            self.0
                .get(attempt as usize - 1)
                .map(|p| Zeroizing::new(p.to_string()))
                .ok_or_else(|| KeyStoreError::Passphrase("no more input".into()))
        }
    }

    fn encrypt(plain: &[u8], passphrase: &str) -> String {
        let key = derive_key(passphrase);
        let cipher = Aes256::new(GenericArray::from_slice(&key[..]));
        let pad = AES_BLOCK - plain.len() % AES_BLOCK;
        let mut buf = plain.to_vec();
        buf.extend(std::iter::repeat(pad as u8).take(pad));
        for block in buf.chunks_exact_mut(AES_BLOCK) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        STANDARD.encode(buf)
    }

    fn wallets_file(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_classify_raw_key_with_and_without_prefix() {
        assert!(matches!(classify_credential(KEY_A), Credential::RawKey(_)));
        assert!(matches!(
            classify_credential(&format!("0x{KEY_A}")),
            Credential::RawKey(_)
        ));
    }

    #[test]
    fn test_classify_blob_and_garbage() {
        let blob = encrypt(&hex::decode(KEY_A).unwrap(), "pw");
        assert!(matches!(classify_credential(&blob), Credential::EncryptedBlob(_)));
        assert!(matches!(classify_credential("not a key!"), Credential::Malformed));
        // Non-canonical base64 (missing padding) is not a blob.
        assert!(matches!(classify_credential("YWJj ZA"), Credential::Malformed));
    }

    #[test]
    fn test_zero_key_is_not_raw() {
        // Hex-shaped but not a valid secret, so it falls through to base64.
        let zeros = "0".repeat(64);
        assert!(matches!(classify_credential(&zeros), Credential::EncryptedBlob(_)));
    }

    #[test]
    fn test_decrypt_round_trip_and_33_byte_plaintext() {
        let key = hex::decode(KEY_A).unwrap();
        let blob = STANDARD.decode(encrypt(&key, "hunter2")).unwrap();
        let handle = decrypt_key(&blob, "hunter2").unwrap();
        assert_eq!(handle.address().unwrap(), ADDR_A.parse::<Address>().unwrap());

        let mut prefixed = vec![0u8];
        prefixed.extend_from_slice(&key);
        let blob = STANDARD.decode(encrypt(&prefixed, "hunter2")).unwrap();
        assert_eq!(
            decrypt_key(&blob, "hunter2").unwrap().address().unwrap(),
            ADDR_A.parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_wrong_passphrase() {
        let blob = STANDARD
            .decode(encrypt(&hex::decode(KEY_A).unwrap(), "right"))
            .unwrap();
        assert!(matches!(
            decrypt_key(&blob, "wrong"),
            Err(KeyStoreError::WrongPassword)
        ));
        assert!(matches!(
            decrypt_key(&blob[..20], "right"),
            Err(KeyStoreError::WrongPassword)
        ));
    }

    #[test]
    fn test_debug_never_prints_key() {
        let wallet = Wallet::from_hex(KEY_A).unwrap();
        let rendered = format!("{wallet:?} {:?}", wallet.key());
        assert!(!rendered.contains(KEY_A));
        assert!(!rendered.to_lowercase().contains("ac0974"));
        assert!(rendered.contains("Wallet"));
    }

    #[test]
    fn test_load_plain_file_skips_malformed_and_blank() {
        let file = wallets_file(&[
            format!("0x{KEY_A}"),
            String::new(),
            "garbage line".to_string(),
            KEY_B.to_string(),
            KEY_A.to_string(),
        ]);
        let wallets = load_wallets(file.path(), &Phrases(vec![])).unwrap();
        let addrs: Vec<Address> = wallets.iter().map(|w| w.address).collect();
        assert_eq!(
            addrs,
            vec![
                ADDR_A.parse::<Address>().unwrap(),
                ADDR_B.parse::<Address>().unwrap()
            ]
        );
    }

    #[test]
    fn test_load_encrypted_file_reprompts() {
        let file = wallets_file(&[
            encrypt(&hex::decode(KEY_A).unwrap(), "secret"),
            encrypt(&hex::decode(KEY_B).unwrap(), "secret"),
            // Plain line in an encrypted file is skipped.
            KEY_B.to_string(),
        ]);
        let wallets = load_wallets(file.path(), &Phrases(vec!["oops", "secret"])).unwrap();
        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[1].address, ADDR_B.parse::<Address>().unwrap());
    }

    #[test]
    fn test_load_encrypted_gives_up_after_attempts() {
        let file = wallets_file(&[encrypt(&hex::decode(KEY_A).unwrap(), "secret")]);
        let result = load_wallets(file.path(), &Phrases(vec!["a", "b", "c", "secret"]));
        assert!(matches!(result, Err(KeyStoreError::WrongPassword)));
    }

    #[test]
    fn test_corrupt_first_blob_does_not_reject_passphrase() {
        let file = wallets_file(&[
            "YWJjZA==".to_string(),
            encrypt(&hex::decode(KEY_A).unwrap(), "secret"),
            encrypt(&hex::decode(KEY_B).unwrap(), "secret"),
        ]);
        let wallets = load_wallets(file.path(), &Phrases(vec!["secret"])).unwrap();
        assert_eq!(
            wallets.iter().map(|w| w.address).collect::<Vec<_>>(),
            vec![
                ADDR_A.parse::<Address>().unwrap(),
                ADDR_B.parse::<Address>().unwrap()
            ]
        );
    }

    #[test]
    fn test_format_fixed_by_first_well_formed_line() {
        let file = wallets_file(&[
            "not a key".to_string(),
            KEY_A.to_string(),
            encrypt(&hex::decode(KEY_B).unwrap(), "secret"),
        ]);
        let wallets = load_wallets(file.path(), &Phrases(vec![])).unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].address, ADDR_A.parse::<Address>().unwrap());
    }

    #[test]
    fn test_missing_and_empty_files() {
        let missing = load_wallets(Path::new("/definitely/not/here.txt"), &Phrases(vec![]));
        assert!(matches!(missing, Err(KeyStoreError::FileNotFound(_))));

        let empty = wallets_file(&["   ".to_string()]);
        assert!(matches!(
            load_wallets(empty.path(), &Phrases(vec![])),
            Err(KeyStoreError::EmptyFile(_))
        ));

        let junk = wallets_file(&["???".to_string()]);
        assert!(matches!(
            load_wallets(junk.path(), &Phrases(vec![])),
            Err(KeyStoreError::UnrecognizedFormat(_))
        ));
    }
}
