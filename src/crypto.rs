//! 암호화 모듈 - 사전 공유 키 기반 AEAD
//!
//! 흐름:
//! 1. 양측이 같은 32바이트 키를 미리 공유
//! 2. 데이터그램마다 랜덤 nonce로 독립 암호화
//! 3. 변조/손상된 데이터그램은 복호화 에러로 보고
//!
//! 기본 구현은 ChaCha20-Poly1305, 대안으로 AES-256-GCM.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    ChaCha20Poly1305,
};
use rand_core::{OsRng, RngCore};

/// 키 크기 (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AEAD nonce 크기 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// AEAD 태그 크기 (16 bytes)
pub const TAG_SIZE: usize = 16;

/// 데이터그램당 암호화 오버헤드
pub const CIPHER_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// 암호화 오류
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("키가 설정되지 않음")]
    KeyNotSet,
    #[error("암호화 실패: {0}")]
    EncryptionFailed(String),
    #[error("복호화 실패: {0}")]
    DecryptionFailed(String),
    #[error("잘못된 키 크기: {0}")]
    InvalidKeySize(usize),
    #[error("잘못된 hex 키: {0}")]
    InvalidHexKey(String),
}

/// 데이터그램 암호화기 인터페이스
///
/// `decrypt(encrypt(x)) == x` 이어야 하고, 변조는 반드시 에러로 드러나야 한다.
pub trait Cipher: Send + Sync {
    /// 키 형식 검사 (설정하지 않음)
    fn validate_key(&self, key: &[u8]) -> Result<(), CryptoError>;

    /// 키 설정
    fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError>;

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// 평문 대비 암호문 증가량 (바이트)
    fn overhead(&self) -> usize {
        CIPHER_OVERHEAD
    }
}

/// hex 문자열 키 파싱 (CLI용)
pub fn parse_hex_key(s: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let raw = hex::decode(s.trim()).map_err(|e| CryptoError::InvalidHexKey(e.to_string()))?;
    let len = raw.len();
    raw.try_into().map_err(|_| CryptoError::InvalidKeySize(len))
}

/// 랜덤 키 생성
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

fn check_key_size(key: &[u8]) -> Result<(), CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeySize(key.len()));
    }
    Ok(())
}

fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// nonce(12) + ciphertext 형태로 묶기
fn seal<A: Aead>(cipher: &A, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes = random_nonce();
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open<A: Aead>(cipher: &A, encrypted: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if encrypted.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed("데이터가 너무 짧음".into()));
    }

    let (nonce, ciphertext) = encrypted.split_at(NONCE_SIZE);
    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// ChaCha20-Poly1305 암호화기 (기본값)
#[derive(Default)]
pub struct ChaChaCipher {
    cipher: Option<ChaCha20Poly1305>,
}

impl ChaChaCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let mut cipher = Self::default();
        cipher.set_key(key)?;
        Ok(cipher)
    }
}

impl Cipher for ChaChaCipher {
    fn validate_key(&self, key: &[u8]) -> Result<(), CryptoError> {
        check_key_size(key)
    }

    fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        self.validate_key(key)?;
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeySize(key.len()))?;
        self.cipher = Some(cipher);
        Ok(())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::KeyNotSet)?;
        seal(cipher, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::KeyNotSet)?;
        open(cipher, ciphertext)
    }
}

/// AES-256-GCM 암호화기
#[derive(Default)]
pub struct AesGcmCipher {
    cipher: Option<Aes256Gcm>,
}

impl AesGcmCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let mut cipher = Self::default();
        cipher.set_key(key)?;
        Ok(cipher)
    }
}

impl Cipher for AesGcmCipher {
    fn validate_key(&self, key: &[u8]) -> Result<(), CryptoError> {
        check_key_size(key)
    }

    fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        self.validate_key(key)?;
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeySize(key.len()))?;
        self.cipher = Some(cipher);
        Ok(())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::KeyNotSet)?;
        seal(cipher, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::KeyNotSet)?;
        open(cipher, ciphertext)
    }
}
