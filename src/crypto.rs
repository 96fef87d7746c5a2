use aes::cipher::block_padding::{Pkcs7, RawPadding};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, KeyIvInit};

use crate::error::{Error, Result};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const BLOCK_SIZE: usize = 16;

/// Ciphertext is run through the block cipher in buffers of this size so a
/// large segment never has to be held twice.
const DECRYPT_BUFFER: usize = 64 * 1024;

/// Decrypt an AES-128-CBC segment in place and strip its PKCS#7 padding.
///
/// The whole buffer is one CBC stream; it is walked in fixed-size chunks
/// with a single chained decryptor. Length or padding violations are
/// decryption failures, never silently recovered.
pub fn decrypt_aes128_cbc(data: &mut Vec<u8>, key: &[u8; 16], iv: &[u8; 16]) -> Result<()> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Decryption(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            data.len()
        )));
    }

    let mut cipher = Aes128CbcDec::new(key.into(), iv.into());
    for chunk in data.chunks_mut(DECRYPT_BUFFER) {
        for block in chunk.chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }

    let tail_start = data.len() - BLOCK_SIZE;
    let kept = Pkcs7::raw_unpad(&data[tail_start..])
        .map_err(|_| Error::Decryption("invalid PKCS#7 padding".to_string()))?
        .len();
    data.truncate(tail_start + kept);
    Ok(())
}

#[cfg(test)]
pub(crate) fn encrypt_aes128_cbc(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    use aes::cipher::BlockEncryptMut;
    type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

    let mut buf = vec![0u8; plain.len() + BLOCK_SIZE];
    buf[..plain.len()].copy_from_slice(plain);
    let written = Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plain.len())
        .expect("buffer sized for padding")
        .len();
    buf.truncate(written);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";
    const IV: [u8; 16] = *b"fedcba9876543210";

    #[test]
    fn round_trip_restores_plaintext() {
        let plain = b"not quite two blocks of payload".to_vec();
        let mut data = encrypt_aes128_cbc(&plain, &KEY, &IV);
        assert_eq!(data.len() % BLOCK_SIZE, 0);
        decrypt_aes128_cbc(&mut data, &KEY, &IV).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn round_trip_spans_multiple_buffers() {
        // Larger than DECRYPT_BUFFER so the chunked walk crosses a boundary.
        let plain: Vec<u8> = (0..DECRYPT_BUFFER + 4096).map(|i| i as u8).collect();
        let mut data = encrypt_aes128_cbc(&plain, &KEY, &IV);
        decrypt_aes128_cbc(&mut data, &KEY, &IV).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn block_aligned_plaintext_gains_full_padding_block() {
        let plain = vec![7u8; BLOCK_SIZE * 2];
        let mut data = encrypt_aes128_cbc(&plain, &KEY, &IV);
        assert_eq!(data.len(), BLOCK_SIZE * 3);
        decrypt_aes128_cbc(&mut data, &KEY, &IV).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn ragged_length_is_rejected() {
        let mut data = vec![0u8; 17];
        let err = decrypt_aes128_cbc(&mut data, &KEY, &IV).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));

        let mut empty = Vec::new();
        assert!(decrypt_aes128_cbc(&mut empty, &KEY, &IV).is_err());
    }

    #[test]
    fn invalid_padding_is_a_decryption_error() {
        use aes::cipher::BlockEncryptMut;
        type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

        // Raw-encrypt a block ending in 0x00, which no PKCS#7 message has.
        let mut block = [0u8; BLOCK_SIZE];
        let mut cipher = Aes128CbcEnc::new((&KEY).into(), (&IV).into());
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(&mut block));
        let mut data = block.to_vec();
        let err = decrypt_aes128_cbc(&mut data, &KEY, &IV).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }
}
