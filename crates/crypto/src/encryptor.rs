//! 认证加密器
//!
//! 每次加密用 PBKDF2-HMAC-SHA256 从主密钥和随机盐值派生独立的 256 位密钥，
//! 再用 ChaCha20-Poly1305 加密。密文 base64 编码，nonce hex 编码。

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};

/// 盐值大小（字节）
pub const SALT_SIZE: usize = 32;
/// nonce 大小（字节）
pub const NONCE_SIZE: usize = 12;
/// 密钥大小（字节）
pub const KEY_SIZE: usize = 32;
/// PBKDF2 迭代次数
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// 加密结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// base64 编码的密文（含认证标签）
    pub ciphertext: String,
    /// hex 编码的 nonce
    pub nonce: String,
}

/// 加密器接口
pub trait Encryptor: Send + Sync {
    /// 加密明文，每次调用生成新的随机 nonce
    fn encrypt(&self, plaintext: &str, salt: &[u8]) -> CryptoResult<EncryptedPayload>;

    /// 解密密文，认证失败时返回 `DecryptionFailed`
    fn decrypt(&self, ciphertext: &str, nonce: &str, salt: &[u8])
        -> CryptoResult<Zeroizing<String>>;

    /// 生成随机盐值
    fn generate_salt(&self) -> CryptoResult<[u8; SALT_SIZE]> {
        let mut salt = [0u8; SALT_SIZE];
        fill_random(&mut salt)?;
        Ok(salt)
    }
}

/// ChaCha20-Poly1305 加密器
pub struct ChaChaEncryptor {
    master_key: Zeroizing<[u8; KEY_SIZE]>,
    iterations: u32,
}

impl ChaChaEncryptor {
    /// 创建加密器，主密钥必须是 32 字节
    pub fn new(master_key: &[u8]) -> CryptoResult<Self> {
        Self::with_iterations(master_key, PBKDF2_ITERATIONS)
    }

    /// 指定 PBKDF2 迭代次数创建加密器
    ///
    /// 生产环境使用 [`ChaChaEncryptor::new`]；较低的迭代次数只用于测试。
    pub fn with_iterations(master_key: &[u8], iterations: u32) -> CryptoResult<Self> {
        if master_key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidMasterKey {
                expected: KEY_SIZE,
                actual: master_key.len(),
            });
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(master_key);

        Ok(Self {
            master_key: key,
            iterations: iterations.max(1),
        })
    }

    /// 从 hex 编码的主密钥创建加密器
    pub fn from_hex(master_key_hex: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(
            hex::decode(master_key_hex.trim())
                .map_err(|e| CryptoError::MalformedMasterKey(e.to_string()))?,
        );
        Self::new(&bytes)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn derive_key(&self, salt: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(&self.master_key[..], salt, self.iterations, &mut key[..]);
        key
    }

    fn cipher_for(&self, salt: &[u8]) -> ChaCha20Poly1305 {
        let key = self.derive_key(salt);
        ChaCha20Poly1305::new(Key::from_slice(&key[..]))
    }
}

fn check_salt(salt: &[u8]) -> CryptoResult<()> {
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidSalt {
            expected: SALT_SIZE,
            actual: salt.len(),
        });
    }
    Ok(())
}

impl Encryptor for ChaChaEncryptor {
    fn encrypt(&self, plaintext: &str, salt: &[u8]) -> CryptoResult<EncryptedPayload> {
        check_salt(salt)?;

        let mut nonce = [0u8; NONCE_SIZE];
        fill_random(&mut nonce)?;

        let ciphertext = self
            .cipher_for(salt)
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(EncryptedPayload {
            ciphertext: STANDARD.encode(ciphertext),
            nonce: hex::encode(nonce),
        })
    }

    fn decrypt(
        &self,
        ciphertext: &str,
        nonce: &str,
        salt: &[u8],
    ) -> CryptoResult<Zeroizing<String>> {
        check_salt(salt)?;

        let ciphertext = STANDARD
            .decode(ciphertext)
            .map_err(|e| CryptoError::InvalidCiphertext(format!("密文 base64 解码失败: {}", e)))?;
        let nonce = hex::decode(nonce)
            .map_err(|e| CryptoError::InvalidCiphertext(format!("nonce hex 解码失败: {}", e)))?;
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidCiphertext(format!(
                "nonce 长度无效: 需要 {} 字节，实际 {} 字节",
                NONCE_SIZE,
                nonce.len()
            )));
        }

        let plaintext = self
            .cipher_for(salt)
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed)?;

        match String::from_utf8(plaintext) {
            Ok(s) => Ok(Zeroizing::new(s)),
            Err(e) => {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                Err(CryptoError::DecryptionFailed)
            }
        }
    }
}

impl fmt::Debug for ChaChaEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaChaEncryptor")
            .field("master_key", &"[REDACTED]")
            .field("iterations", &self.iterations)
            .finish()
    }
}

fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))
}

/// 生成随机主密钥（用于初始化部署）
pub fn generate_master_key() -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    fill_random(&mut key[..])?;
    Ok(key)
}

/// 生成 hex 编码的随机主密钥
pub fn generate_master_key_hex() -> CryptoResult<Zeroizing<String>> {
    let key = generate_master_key()?;
    Ok(Zeroizing::new(hex::encode(&key[..])))
}

/// 覆写字节缓冲区
pub fn clear_bytes(buf: &mut [u8]) {
    buf.zeroize();
}

/// 覆写并清空字符串
pub fn clear_string(s: &mut String) {
    s.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // 属性测试降低迭代次数，默认迭代次数单独覆盖
    const TEST_ITERATIONS: u32 = 1_000;

    fn test_encryptor(seed: u8) -> ChaChaEncryptor {
        ChaChaEncryptor::with_iterations(&[seed; KEY_SIZE], TEST_ITERATIONS).unwrap()
    }

    fn flip_bit(bytes: &mut [u8], bit: usize) {
        let idx = (bit / 8) % bytes.len();
        bytes[idx] ^= 1 << (bit % 8);
    }

    #[test]
    fn test_rejects_wrong_master_key_length() {
        let err = ChaChaEncryptor::new(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidMasterKey {
                expected: 32,
                actual: 16
            }
        );
    }

    #[test]
    fn test_from_hex() {
        let hex_key = generate_master_key_hex().unwrap();
        assert_eq!(hex_key.len(), 64);
        assert!(ChaChaEncryptor::from_hex(&hex_key).is_ok());

        assert!(matches!(
            ChaChaEncryptor::from_hex("not-hex"),
            Err(CryptoError::MalformedMasterKey(_))
        ));
        assert!(matches!(
            ChaChaEncryptor::from_hex("abcd"),
            Err(CryptoError::InvalidMasterKey { actual: 2, .. })
        ));
    }

    #[test]
    fn test_default_iterations_roundtrip() {
        let encryptor = ChaChaEncryptor::new(&[7u8; KEY_SIZE]).unwrap();
        assert_eq!(encryptor.iterations(), PBKDF2_ITERATIONS);

        let salt = encryptor.generate_salt().unwrap();
        let payload = encryptor.encrypt("sk-test-1234567890", &salt).unwrap();
        let plaintext = encryptor
            .decrypt(&payload.ciphertext, &payload.nonce, &salt)
            .unwrap();
        assert_eq!(plaintext.as_str(), "sk-test-1234567890");
    }

    #[test]
    fn test_roundtrip_empty_and_unicode() {
        let encryptor = test_encryptor(1);
        for plaintext in ["", "密钥-🔑-ключ", "sk-ant-api03-xyz"] {
            let salt = encryptor.generate_salt().unwrap();
            let payload = encryptor.encrypt(plaintext, &salt).unwrap();
            let decrypted = encryptor
                .decrypt(&payload.ciphertext, &payload.nonce, &salt)
                .unwrap();
            assert_eq!(decrypted.as_str(), plaintext);
        }
    }

    #[test]
    fn test_salt_length_checked_before_crypto() {
        let encryptor = test_encryptor(1);
        assert_eq!(
            encryptor.encrypt("secret", &[0u8; 16]).unwrap_err(),
            CryptoError::InvalidSalt {
                expected: SALT_SIZE,
                actual: 16
            }
        );
        assert!(matches!(
            encryptor.decrypt("AAAA", "00", &[0u8; 31]),
            Err(CryptoError::InvalidSalt { actual: 31, .. })
        ));
    }

    #[test]
    fn test_malformed_inputs_are_invalid_ciphertext() {
        let encryptor = test_encryptor(1);
        let salt = encryptor.generate_salt().unwrap();
        let payload = encryptor.encrypt("secret-value", &salt).unwrap();

        assert!(matches!(
            encryptor.decrypt("%%%not-base64", &payload.nonce, &salt),
            Err(CryptoError::InvalidCiphertext(_))
        ));
        assert!(matches!(
            encryptor.decrypt(&payload.ciphertext, "zz", &salt),
            Err(CryptoError::InvalidCiphertext(_))
        ));
        assert!(matches!(
            encryptor.decrypt(&payload.ciphertext, "00112233", &salt),
            Err(CryptoError::InvalidCiphertext(_))
        ));
    }

    #[test]
    fn test_distinct_salts_give_distinct_ciphertexts() {
        let encryptor = test_encryptor(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let salt = encryptor.generate_salt().unwrap();
            let payload = encryptor.encrypt("same plaintext", &salt).unwrap();
            assert!(seen.insert(payload.ciphertext), "密文不应重复");
        }
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let a = test_encryptor(1);
        let b = test_encryptor(2);
        let salt = a.generate_salt().unwrap();
        let payload = a.encrypt("provider-secret", &salt).unwrap();

        assert_eq!(
            b.decrypt(&payload.ciphertext, &payload.nonce, &salt)
                .unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_debug_redacts_master_key() {
        let encryptor = test_encryptor(9);
        let debug = format!("{:?}", encryptor);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("9, 9"));
    }

    #[test]
    fn test_clear_helpers() {
        let mut buf = vec![1u8, 2, 3];
        clear_bytes(&mut buf);
        assert_eq!(buf, vec![0, 0, 0]);

        let mut s = String::from("sk-live");
        clear_string(&mut s);
        assert!(s.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_roundtrip(plaintext in ".*") {
            let encryptor = test_encryptor(5);
            let salt = encryptor.generate_salt().unwrap();
            let payload = encryptor.encrypt(&plaintext, &salt).unwrap();
            let decrypted = encryptor
                .decrypt(&payload.ciphertext, &payload.nonce, &salt)
                .unwrap();
            prop_assert_eq!(decrypted.as_str(), plaintext.as_str());
        }

        #[test]
        fn prop_ciphertext_bit_flip_detected(plaintext in "[a-zA-Z0-9]{1,64}", bit in 0usize..4096) {
            let encryptor = test_encryptor(5);
            let salt = encryptor.generate_salt().unwrap();
            let payload = encryptor.encrypt(&plaintext, &salt).unwrap();

            let mut raw = STANDARD.decode(&payload.ciphertext).unwrap();
            flip_bit(&mut raw, bit);
            let tampered = STANDARD.encode(&raw);

            prop_assert_eq!(
                encryptor.decrypt(&tampered, &payload.nonce, &salt).unwrap_err(),
                CryptoError::DecryptionFailed
            );
        }

        #[test]
        fn prop_nonce_bit_flip_detected(bit in 0usize..(NONCE_SIZE * 8)) {
            let encryptor = test_encryptor(5);
            let salt = encryptor.generate_salt().unwrap();
            let payload = encryptor.encrypt("sk-nonce-check", &salt).unwrap();

            let mut nonce = hex::decode(&payload.nonce).unwrap();
            flip_bit(&mut nonce, bit);

            prop_assert_eq!(
                encryptor
                    .decrypt(&payload.ciphertext, &hex::encode(nonce), &salt)
                    .unwrap_err(),
                CryptoError::DecryptionFailed
            );
        }

        #[test]
        fn prop_salt_bit_flip_detected(bit in 0usize..(SALT_SIZE * 8)) {
            let encryptor = test_encryptor(5);
            let salt = encryptor.generate_salt().unwrap();
            let payload = encryptor.encrypt("sk-salt-check", &salt).unwrap();

            let mut tampered_salt = salt;
            flip_bit(&mut tampered_salt, bit);

            prop_assert_eq!(
                encryptor
                    .decrypt(&payload.ciphertext, &payload.nonce, &tampered_salt)
                    .unwrap_err(),
                CryptoError::DecryptionFailed
            );
        }
    }
}
