//! 암호화기 + 압축기 묶음
//!
//! 송신측과 수신측이 같은 조합을 써야 한다.

use std::sync::Arc;

use crate::compress::{Compressor, DeflateCompressor, NoCompression, ZlibCompressor};
use crate::crypto::{AesGcmCipher, ChaChaCipher, Cipher};
use crate::{Error, Result};

/// 교체 가능한 암호화/압축 구현 묶음
#[derive(Clone)]
pub struct Pipeline {
    pub cipher: Arc<dyn Cipher>,
    pub compressor: Arc<dyn Compressor>,
}

impl Pipeline {
    /// 기본 조합: ChaCha20-Poly1305 + zlib
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Self {
            cipher: Arc::new(ChaChaCipher::new(key)?),
            compressor: Arc::new(ZlibCompressor::default()),
        })
    }

    pub fn with(cipher: Arc<dyn Cipher>, compressor: Arc<dyn Compressor>) -> Self {
        Self { cipher, compressor }
    }

    /// 이름으로 조합 선택
    ///
    /// cipher: `chacha` | `aes`, compressor: `zlib` | `deflate` | `none`
    pub fn from_names(key: &[u8], cipher: &str, compressor: &str) -> Result<Self> {
        let cipher: Arc<dyn Cipher> = match cipher {
            "chacha" | "chacha20poly1305" => Arc::new(ChaChaCipher::new(key)?),
            "aes" | "aes256gcm" => Arc::new(AesGcmCipher::new(key)?),
            other => return Err(Error::InvalidConfig(format!("unknown cipher: {}", other))),
        };

        let compressor: Arc<dyn Compressor> = match compressor {
            "zlib" => Arc::new(ZlibCompressor::default()),
            "deflate" => Arc::new(DeflateCompressor::default()),
            "none" => Arc::new(NoCompression),
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unknown compressor: {}",
                    other
                )))
            }
        };

        Ok(Self { cipher, compressor })
    }

    /// 평문 데이터그램 암호화
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.cipher.encrypt(plaintext)?)
    }

    /// 데이터그램 복호화
    pub fn open(&self, datagram: &[u8]) -> Result<Vec<u8>> {
        Ok(self.cipher.decrypt(datagram)?)
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.compressor
            .compress(data)
            .map_err(|e| Error::Compression(e.to_string()))
    }

    /// 암호화 후 데이터그램 크기
    pub fn sealed_len(&self, plaintext_len: usize) -> usize {
        plaintext_len + self.cipher.overhead()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("compressor", &self.compressor.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key;

    #[test]
    fn test_seal_open() {
        let key = generate_key();
        let sender = Pipeline::new(&key).unwrap();
        let receiver = Pipeline::new(&key).unwrap();

        let sealed = sender.seal(b"HREQ:item").unwrap();
        assert_eq!(sealed.len(), sender.sealed_len(9));
        assert_eq!(receiver.open(&sealed).unwrap(), b"HREQ:item");
    }

    #[test]
    fn test_swapped_variants() {
        let key = generate_key();
        let aes = Pipeline::with(
            Arc::new(AesGcmCipher::new(&key).unwrap()),
            Arc::new(NoCompression),
        );
        let chacha = Pipeline::new(&key).unwrap();

        let sealed = aes.seal(b"FRAG:...").unwrap();
        assert!(matches!(chacha.open(&sealed), Err(Error::Crypto(_))));
        assert_eq!(aes.compress(b"abc").unwrap(), b"abc");
        assert!(Pipeline::new(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_from_names() {
        let key = generate_key();
        let aes = Pipeline::from_names(&key, "aes", "deflate").unwrap();
        let same = Pipeline::with(
            Arc::new(AesGcmCipher::new(&key).unwrap()),
            Arc::new(DeflateCompressor::default()),
        );

        let sealed = aes.seal(b"CONF:x").unwrap();
        assert_eq!(same.open(&sealed).unwrap(), b"CONF:x");
        assert_eq!(aes.compressor.name(), "deflate");

        assert!(matches!(
            Pipeline::from_names(&key, "rot13", "zlib"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(Pipeline::from_names(&key, "chacha", "lz4").is_err());
    }
}
