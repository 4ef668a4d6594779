//! Encrypted Advertising Data (Core Supplement, Part A, 1.23)
//!
//! The host owns the key material and the payload layout. The AEAD itself is a
//! collaborator: [`AdvertisingCipher`] seals in place with AES-CCM and a 4-byte MIC.

use rand_core::RngCore;

use crate::{
    Error,
    advertising::gap::{self, GapData, GapDataType},
    constants::{
        ENCRYPTED_DATA_AAD, ENCRYPTED_DATA_MIC_LENGTH, GAP_DATA_CAPACITY, RANDOMIZER_LENGTH,
    },
};

/// Length of the session key
pub const KEY_LENGTH: usize = 16;

/// Length of the initialization vector
pub const IV_LENGTH: usize = 8;

/// Length of the CCM nonce: randomizer followed by IV
pub const NONCE_LENGTH: usize = RANDOMIZER_LENGTH + IV_LENGTH;

/// Session key and IV shared with peers out of band
///
/// Laid out as the Encrypted Data Key Material characteristic (Core Supplement, Part A,
/// 1.23): a 16-byte session key followed by an 8-byte IV. The IV is the fixed tail of
/// the 13-byte CCM nonce whose head is the per-payload 5-byte randomizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyMaterial {
    /// Session key
    pub key: [u8; KEY_LENGTH],
    /// Initialization vector
    pub iv: [u8; IV_LENGTH],
}

impl KeyMaterial {
    /// Serialized size in the key store
    pub const SIZE: usize = KEY_LENGTH + IV_LENGTH;

    /// Draw fresh key material: two 8-byte draws for the key, one for the IV
    pub fn generate(rng: &mut dyn RngCore) -> Self {
        let mut key = [0; KEY_LENGTH];
        key[..8].copy_from_slice(&rng.next_u64().to_le_bytes());
        key[8..].copy_from_slice(&rng.next_u64().to_le_bytes());
        Self {
            key,
            iv: rng.next_u64().to_le_bytes(),
        }
    }

    /// Key followed by IV
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[..KEY_LENGTH].copy_from_slice(&self.key);
        bytes[KEY_LENGTH..].copy_from_slice(&self.iv);
        bytes
    }

    /// Inverse of [`KeyMaterial::to_bytes`]
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] unless `bytes` is exactly [`KeyMaterial::SIZE`] long
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != Self::SIZE {
            return Err(Error::InvalidParameter);
        }
        let mut material = Self::default();
        material.key.copy_from_slice(&bytes[..KEY_LENGTH]);
        material.iv.copy_from_slice(&bytes[KEY_LENGTH..]);
        Ok(material)
    }
}

/// Persistent storage for the key material
pub trait KeyMaterialStore {
    /// Stored material under `name`, if any
    fn load(&self, name: &str) -> Option<KeyMaterial>;

    /// Persist `material` under `name`
    fn store(&self, name: &str, material: &KeyMaterial);
}

/// AES-CCM sealing with a 4-byte MIC
pub trait AdvertisingCipher {
    /// Encrypt `data` in place and return the MIC
    fn seal(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_LENGTH],
        aad: &[u8],
        data: &mut [u8],
    ) -> [u8; ENCRYPTED_DATA_MIC_LENGTH];
}

/// Draw a randomizer for one payload update
pub fn randomizer(rng: &mut dyn RngCore) -> [u8; RANDOMIZER_LENGTH] {
    let mut randomizer = [0; RANDOMIZER_LENGTH];
    rng.fill_bytes(&mut randomizer);
    randomizer
}

/// Nonce of one payload: randomizer then IV, both byte-reversed
#[must_use]
pub fn nonce(randomizer: &[u8; RANDOMIZER_LENGTH], iv: &[u8; IV_LENGTH]) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0; NONCE_LENGTH];
    for (slot, byte) in nonce.iter_mut().zip(randomizer.iter().rev().chain(iv.iter().rev())) {
        *slot = *byte;
    }
    nonce
}

/// Seal `elements` into one Encrypted Data element
///
/// The element carries the reversed randomizer, the ciphertext of the serialized
/// elements and the MIC.
///
/// # Errors
/// * [`Error::BufferFull`] if the sealed element does not fit a GAP element
/// * Any error serializing `elements`
pub fn seal(
    cipher: &dyn AdvertisingCipher,
    material: &KeyMaterial,
    randomizer: &[u8; RANDOMIZER_LENGTH],
    elements: &[GapData],
) -> Result<GapData, Error> {
    let plaintext = gap::serialize(elements)?;
    if RANDOMIZER_LENGTH + plaintext.len() + ENCRYPTED_DATA_MIC_LENGTH > GAP_DATA_CAPACITY {
        return Err(Error::BufferFull);
    }
    let mut element = GapData {
        data_type: GapDataType::ENCRYPTED_ADVERTISING_DATA,
        data: heapless::Vec::new(),
    };
    for byte in randomizer.iter().rev() {
        element.data.push(*byte).map_err(|_| Error::BufferFull)?;
    }
    element
        .data
        .extend_from_slice(&plaintext)
        .map_err(|()| Error::BufferFull)?;
    let mic = cipher.seal(
        &material.key,
        &nonce(randomizer, &material.iv),
        &ENCRYPTED_DATA_AAD,
        &mut element.data[RANDOMIZER_LENGTH..],
    );
    element
        .data
        .extend_from_slice(&mic)
        .map_err(|()| Error::BufferFull)?;
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use std::vec::Vec as StdVec;

    struct Counter(u64);

    impl RngCore for Counter {
        fn next_u32(&mut self) -> u32 {
            self.next_u64() as u32
        }

        fn next_u64(&mut self) -> u64 {
            self.0 += 1;
            self.0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for byte in dest {
                *byte = self.next_u64() as u8;
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    /// XORs with 0x5A and reports the nonce it saw
    #[derive(Default)]
    struct XorCipher {
        nonces: RefCell<StdVec<[u8; NONCE_LENGTH]>>,
    }

    impl AdvertisingCipher for XorCipher {
        fn seal(
            &self,
            _key: &[u8; KEY_LENGTH],
            nonce: &[u8; NONCE_LENGTH],
            aad: &[u8],
            data: &mut [u8],
        ) -> [u8; ENCRYPTED_DATA_MIC_LENGTH] {
            assert_eq!(aad, &[0xEA]);
            self.nonces.borrow_mut().push(*nonce);
            for byte in data.iter_mut() {
                *byte ^= 0x5A;
            }
            [0xDE, 0xAD, 0xBE, 0xEF]
        }
    }

    #[test]
    fn test_generate_uses_three_draws() {
        let material = KeyMaterial::generate(&mut Counter(0));
        assert_eq!(material.key[0], 1);
        assert_eq!(material.key[8], 2);
        assert_eq!(material.iv[0], 3);
        assert_eq!(KeyMaterial::from_bytes(&material.to_bytes()), Ok(material));
        assert_eq!(KeyMaterial::from_bytes(&[0; 3]), Err(Error::InvalidParameter));
    }

    #[test]
    fn test_nonce_reverses_both_parts() {
        let nonce = nonce(&[1, 2, 3, 4, 5], &[10, 11, 12, 13, 14, 15, 16, 17]);
        assert_eq!(nonce, [5, 4, 3, 2, 1, 17, 16, 15, 14, 13, 12, 11, 10]);
    }

    #[test]
    fn test_sealed_element_layout() {
        let cipher = XorCipher::default();
        let material = KeyMaterial {
            key: [0x11; KEY_LENGTH],
            iv: [0; IV_LENGTH],
        };
        let name = GapData::new(GapDataType::COMPLETE_LOCAL_NAME, b"x").unwrap();

        let sealed = seal(&cipher, &material, &[1, 2, 3, 4, 5], &[name]).unwrap();

        assert_eq!(sealed.data_type, GapDataType::ENCRYPTED_ADVERTISING_DATA);
        assert_eq!(
            sealed.data.as_slice(),
            &[5, 4, 3, 2, 1, 2 ^ 0x5A, 0x09 ^ 0x5A, b'x' ^ 0x5A, 0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(cipher.nonces.borrow()[0][..5], [5, 4, 3, 2, 1]);
    }
}
