//! 请求签名与章节解密。

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// 计算接口签名：参数键按字典序排序后拼接 `key=value`，末尾追加签名密钥，
/// 对整串取 MD5 十六进制。
pub fn sign_params(params: &[(&str, &str)], sign_key: &str) -> String {
    let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);

    let mut buf = String::new();
    for (k, v) in sorted {
        buf.push_str(k);
        buf.push('=');
        buf.push_str(v);
    }
    buf.push_str(sign_key);

    format!("{:x}", md5::compute(buf.as_bytes()))
}

/// Java 风格的字符串 hashCode（按 UTF-16 码元，32 位回绕）。
/// 上游以它为种子挑选请求头里的 app-version。
pub fn java_hash_code(s: &str) -> i32 {
    let mut hash: i32 = 0;
    for unit in s.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(unit as i32);
    }
    hash
}

/// 解密章节密文：base64 解码后前 16 字节为 IV，余下为 AES-128-CBC 密文，
/// PKCS7 去填充，按 UTF-8 还原正文。
pub fn decrypt_chapter_content(encrypted: &str, key_hex: &str) -> Result<String> {
    let key = hex::decode(key_hex)?;
    let raw = B64.decode(encrypted.trim())?;
    if raw.len() < 17 {
        return Err(anyhow!("密文过短: {} 字节", raw.len()));
    }
    let (iv, cipher) = raw.split_at(16);

    let decryptor =
        Aes128CbcDec::new_from_slices(&key, iv).map_err(|e| anyhow!("密钥或 IV 非法: {e}"))?;
    let mut buf = cipher.to_vec();
    let plain = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| anyhow!("解密失败: {e}"))?;

    Ok(String::from_utf8(plain.to_vec())?)
}
