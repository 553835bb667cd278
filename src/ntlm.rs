//! NTLM message codec (MS-NLMP), NTLMv2 responses only
//!
//! Produces the NEGOTIATE (type 1) and AUTHENTICATE (type 3) messages a
//! client sends to a proxy, and parses the CHALLENGE (type 2) message the
//! proxy answers with. The connection handling lives in
//! [`crate::strategy::ntlm`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

pub const NEGOTIATE_MESSAGE: u32 = 1;
pub const CHALLENGE_MESSAGE: u32 = 2;
pub const AUTHENTICATE_MESSAGE: u32 = 3;

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const NEGOTIATE_OEM: u32 = 0x0000_0002;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
pub const NEGOTIATE_128: u32 = 0x2000_0000;
pub const NEGOTIATE_56: u32 = 0x8000_0000;

/// Flags offered in the NEGOTIATE message.
pub const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_128
    | NEGOTIATE_56;

const AV_EOL: u16 = 0;
const AV_TIMESTAMP: u16 = 7;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

const AUTHENTICATE_HEADER_LEN: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NtlmError {
    #[error("message too short ({len} bytes)")]
    TooShort { len: usize },
    #[error("missing NTLMSSP signature")]
    BadSignature,
    #[error("unexpected message type {0}")]
    UnexpectedMessageType(u32),
    #[error("{field} points outside the message")]
    BufferOutOfRange { field: &'static str },
    #[error("invalid base64 token: {0}")]
    Base64(String),
    #[error("HMAC key rejected")]
    Crypto,
}

/// Username/password pair split into the fields NTLM wants.
#[derive(Debug, Clone)]
pub struct NtlmCredentials {
    pub domain: String,
    pub username: String,
    pub workstation: String,
    password: SecretString,
}

impl NtlmCredentials {
    /// Accepts `DOMAIN\user`, `user@realm` (kept whole, empty domain) or a bare user.
    pub fn new(user: &str, password: SecretString) -> Self {
        let (domain, username) = match user.split_once('\\') {
            Some((domain, name)) => (domain.to_string(), name.to_string()),
            None => (String::new(), user.to_string()),
        };
        Self {
            domain,
            username,
            workstation: String::new(),
            password,
        }
    }

    pub fn with_workstation(mut self, workstation: impl Into<String>) -> Self {
        self.workstation = workstation.into();
        self
    }

    fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Parsed CHALLENGE (type 2) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_name: Vec<u8>,
    pub target_info: Vec<u8>,
}

impl ChallengeMessage {
    pub fn new(server_challenge: [u8; 8], target_info: Vec<u8>) -> Self {
        Self {
            flags: CLIENT_FLAGS | NEGOTIATE_TARGET_INFO,
            server_challenge,
            target_name: Vec::new(),
            target_info,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, NtlmError> {
        check_header(bytes, CHALLENGE_MESSAGE, 32)?;

        let target_name = read_buffer(bytes, 12, "target name")?.to_vec();
        let flags = read_u32(bytes, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&bytes[24..32]);

        // Older servers stop after the challenge and the reserved field.
        let target_info = if bytes.len() >= 48 {
            read_buffer(bytes, 40, "target info")?.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_name,
            target_info,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header_len = 48;
        let mut out = Vec::with_capacity(header_len + self.target_name.len() + self.target_info.len());
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&CHALLENGE_MESSAGE.to_le_bytes());
        write_buffer(&mut out, self.target_name.len(), header_len);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.server_challenge);
        out.extend_from_slice(&[0u8; 8]);
        write_buffer(&mut out, self.target_info.len(), header_len + self.target_name.len());
        out.extend_from_slice(&self.target_name);
        out.extend_from_slice(&self.target_info);
        out
    }

    /// Server-supplied FILETIME from the `MsvAvTimestamp` AV pair, if any.
    pub fn timestamp(&self) -> Option<u64> {
        av_pairs(&self.target_info)
            .find(|(id, value)| *id == AV_TIMESTAMP && value.len() == 8)
            .map(|(_, value)| read_u64(value, 0))
    }

    fn is_unicode(&self) -> bool {
        self.flags & NEGOTIATE_UNICODE != 0
    }
}

/// Fields of an AUTHENTICATE (type 3) message, decoded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateMessage {
    pub flags: u32,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub username: String,
    pub workstation: String,
}

impl AuthenticateMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, NtlmError> {
        check_header(bytes, AUTHENTICATE_MESSAGE, AUTHENTICATE_HEADER_LEN)?;
        let flags = read_u32(bytes, 60);
        let text = |offset: usize, field: &'static str| -> Result<String, NtlmError> {
            let raw = read_buffer(bytes, offset, field)?;
            Ok(if flags & NEGOTIATE_UNICODE != 0 {
                from_utf16le(raw)
            } else {
                String::from_utf8_lossy(raw).into_owned()
            })
        };

        Ok(Self {
            flags,
            lm_response: read_buffer(bytes, 12, "LM response")?.to_vec(),
            nt_response: read_buffer(bytes, 20, "NT response")?.to_vec(),
            domain: text(28, "domain")?,
            username: text(36, "user name")?,
            workstation: text(44, "workstation")?,
        })
    }

    /// Recomputes the NTProofStr the way an acceptor does and compares it.
    pub fn verify(&self, password: &str, server_challenge: &[u8; 8]) -> bool {
        if self.nt_response.len() < 16 {
            return false;
        }
        let (proof, blob) = self.nt_response.split_at(16);
        let Ok(key) = ntowf_v2(password, &self.username, &self.domain) else {
            return false;
        };
        match hmac_md5(&key, &[server_challenge, blob]) {
            Ok(expected) => expected.as_slice() == proof,
            Err(_) => false,
        }
    }
}

/// NEGOTIATE (type 1) message without domain or workstation hints.
pub fn negotiate_message() -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&NEGOTIATE_MESSAGE.to_le_bytes());
    out.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    write_buffer(&mut out, 0, 0);
    write_buffer(&mut out, 0, 0);
    out
}

/// AUTHENTICATE (type 3) message answering `challenge` with an NTLMv2 response.
///
/// `timestamp` is a Windows FILETIME; it is ignored when the server
/// supplied its own in the target info.
pub fn authenticate_message(
    credentials: &NtlmCredentials,
    challenge: &ChallengeMessage,
    client_challenge: [u8; 8],
    timestamp: u64,
) -> Result<Vec<u8>, NtlmError> {
    let server_timestamp = challenge.timestamp();
    let timestamp = server_timestamp.unwrap_or(timestamp);

    let key = ntowf_v2(credentials.password(), &credentials.username, &credentials.domain)?;
    let nt_response = ntlmv2_response(&key, &challenge.server_challenge, &client_challenge, timestamp, &challenge.target_info)?;
    // MS-NLMP 3.1.5.1.2: with a server timestamp the LM response is all zeroes.
    let lm_response = if server_timestamp.is_some() {
        vec![0u8; 24]
    } else {
        lmv2_response(&key, &challenge.server_challenge, &client_challenge)?
    };

    let encode = |s: &str| {
        if challenge.is_unicode() {
            to_utf16le(s)
        } else {
            s.as_bytes().to_vec()
        }
    };
    let domain = encode(&credentials.domain);
    let user = encode(&credentials.username);
    let workstation = encode(&credentials.workstation);

    let flags = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_NTLM;

    let mut offset = AUTHENTICATE_HEADER_LEN;
    let mut out = Vec::with_capacity(
        AUTHENTICATE_HEADER_LEN + lm_response.len() + nt_response.len() + domain.len() + user.len() + workstation.len(),
    );
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&AUTHENTICATE_MESSAGE.to_le_bytes());
    for field in [&lm_response, &nt_response, &domain, &user, &workstation] {
        write_buffer(&mut out, field.len(), offset);
        offset += field.len();
    }
    // No exported session key.
    write_buffer(&mut out, 0, offset);
    out.extend_from_slice(&flags.to_le_bytes());

    for field in [&lm_response, &nt_response, &domain, &user, &workstation] {
        out.extend_from_slice(field);
    }
    Ok(out)
}

/// Current time as a Windows FILETIME (100ns ticks since 1601).
pub fn filetime_now() -> u64 {
    let now = chrono::Utc::now();
    let secs = (now.timestamp() + FILETIME_EPOCH_OFFSET).max(0) as u64;
    secs * 10_000_000 + u64::from(now.timestamp_subsec_nanos()) / 100
}

/// Message type of a raw NTLM message, if it carries the signature.
pub fn message_type(bytes: &[u8]) -> Option<u32> {
    (bytes.len() >= 12 && &bytes[..8] == SIGNATURE).then(|| read_u32(bytes, 8))
}

/// `NTLM <base64>` header value.
pub fn encode_header(message: &[u8]) -> String {
    format!("NTLM {}", STANDARD.encode(message))
}

pub fn decode_token(token: &str) -> Result<Vec<u8>, NtlmError> {
    STANDARD
        .decode(token.trim())
        .map_err(|e| NtlmError::Base64(e.to_string()))
}

/// NT hash: MD4 over the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    let digest = Md4::digest(to_utf16le(password));
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// NTOWFv2: HMAC-MD5 keyed with the NT hash over UPPER(user) + domain.
pub fn ntowf_v2(password: &str, username: &str, domain: &str) -> Result<[u8; 16], NtlmError> {
    let identity = to_utf16le(&format!("{}{}", username.to_uppercase(), domain));
    hmac_md5(&nt_hash(password), &[&identity])
}

pub fn lmv2_response(key: &[u8; 16], server_challenge: &[u8; 8], client_challenge: &[u8; 8]) -> Result<Vec<u8>, NtlmError> {
    let mac = hmac_md5(key, &[server_challenge, client_challenge])?;
    let mut out = mac.to_vec();
    out.extend_from_slice(client_challenge);
    Ok(out)
}

pub fn ntlmv2_response(
    key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
    target_info: &[u8],
) -> Result<Vec<u8>, NtlmError> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let proof = hmac_md5(key, &[server_challenge, &blob])?;
    let mut out = proof.to_vec();
    out.extend_from_slice(&blob);
    Ok(out)
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], NtlmError> {
    let mut mac = HmacMd5::new_from_slice(key).map_err(|_| NtlmError::Crypto)?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn check_header(bytes: &[u8], expected: u32, min_len: usize) -> Result<(), NtlmError> {
    if bytes.len() < min_len {
        return Err(NtlmError::TooShort { len: bytes.len() });
    }
    if &bytes[..8] != SIGNATURE {
        return Err(NtlmError::BadSignature);
    }
    match read_u32(bytes, 8) {
        found if found == expected => Ok(()),
        found => Err(NtlmError::UnexpectedMessageType(found)),
    }
}

fn av_pairs(mut info: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    std::iter::from_fn(move || {
        if info.len() < 4 {
            return None;
        }
        let id = read_u16(info, 0);
        let len = read_u16(info, 2) as usize;
        if id == AV_EOL || info.len() < 4 + len {
            return None;
        }
        let value = &info[4..4 + len];
        info = &info[4 + len..];
        Some((id, value))
    })
}

fn write_buffer(out: &mut Vec<u8>, len: usize, offset: usize) {
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&(offset as u32).to_le_bytes());
}

fn read_buffer<'a>(bytes: &'a [u8], at: usize, field: &'static str) -> Result<&'a [u8], NtlmError> {
    let len = read_u16(bytes, at) as usize;
    let offset = read_u32(bytes, at + 4) as usize;
    if len == 0 {
        return Ok(&[]);
    }
    bytes
        .get(offset..offset + len)
        .ok_or(NtlmError::BufferOutOfRange { field })
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn from_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vectors from MS-NLMP section 4.2.
    const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
    const CLIENT_CHALLENGE: [u8; 8] = [0xaa; 8];

    fn credentials() -> NtlmCredentials {
        NtlmCredentials::new("Domain\\User", SecretString::new("Password".to_string()))
    }

    #[test]
    fn test_nt_hash_vector() {
        assert_eq!(hex::encode(nt_hash("Password")), "a4f49c406510bdcab6824ee7c30fd852");
    }

    #[test]
    fn test_ntowf_v2_vector() {
        let key = ntowf_v2("Password", "User", "Domain").unwrap();
        assert_eq!(hex::encode(key), "0c868a403bfd7a93a3001ef22ef02e3f");
    }

    #[test]
    fn test_lmv2_vector() {
        let key = ntowf_v2("Password", "User", "Domain").unwrap();
        let lm = lmv2_response(&key, &SERVER_CHALLENGE, &CLIENT_CHALLENGE).unwrap();
        assert_eq!(
            hex::encode(lm),
            "86c35097ac9cec102554764a57cccc19aaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn test_ntlmv2_response_vector() {
        // MsvAvNbDomainName "Domain", MsvAvNbComputerName "Server", MsvAvEOL.
        let target_info = hex::decode(concat!(
            "02000c0044006f006d00610069006e00",
            "01000c00530065007200760065007200",
            "00000000",
        ))
        .unwrap();
        let key = ntowf_v2("Password", "User", "Domain").unwrap();
        let response = ntlmv2_response(&key, &SERVER_CHALLENGE, &CLIENT_CHALLENGE, 0, &target_info).unwrap();

        assert_eq!(hex::encode(&response[..16]), "68cd0ab851e51c96aabc927bebef6a1c");
        assert_eq!(
            hex::encode(&response[16..]),
            concat!(
                "0101000000000000",
                "0000000000000000",
                "aaaaaaaaaaaaaaaa",
                "00000000",
                "02000c0044006f006d00610069006e00",
                "01000c00530065007200760065007200",
                "00000000",
                "00000000",
            )
        );
    }

    #[test]
    fn test_credentials_split_domain() {
        let creds = credentials();
        assert_eq!(creds.domain, "Domain");
        assert_eq!(creds.username, "User");

        let upn = NtlmCredentials::new("user@EXAMPLE.COM", SecretString::new("x".into()));
        assert_eq!(upn.domain, "");
        assert_eq!(upn.username, "user@EXAMPLE.COM");
    }

    #[test]
    fn test_negotiate_message_layout() {
        let msg = negotiate_message();
        assert_eq!(msg.len(), 32);
        assert_eq!(message_type(&msg), Some(NEGOTIATE_MESSAGE));
        assert_eq!(read_u32(&msg, 12), CLIENT_FLAGS);
    }

    #[test]
    fn test_challenge_parse_of_serialized_message() {
        let info = vec![0x02, 0x00, 0x02, 0x00, b'D', 0x00, 0x00, 0x00, 0x00, 0x00];
        let challenge = ChallengeMessage::new(SERVER_CHALLENGE, info.clone());
        let parsed = ChallengeMessage::parse(&challenge.to_bytes()).unwrap();
        assert_eq!(parsed.server_challenge, SERVER_CHALLENGE);
        assert_eq!(parsed.target_info, info);
        assert!(parsed.timestamp().is_none());
    }

    #[test]
    fn test_challenge_parse_rejects_garbage() {
        assert_eq!(ChallengeMessage::parse(b"short"), Err(NtlmError::TooShort { len: 5 }));

        let mut wrong_sig = ChallengeMessage::new(SERVER_CHALLENGE, vec![]).to_bytes();
        wrong_sig[0] = b'X';
        assert_eq!(ChallengeMessage::parse(&wrong_sig), Err(NtlmError::BadSignature));

        assert_eq!(
            ChallengeMessage::parse(&[negotiate_message(), vec![0u8; 16]].concat()),
            Err(NtlmError::UnexpectedMessageType(NEGOTIATE_MESSAGE))
        );
    }

    #[test]
    fn test_challenge_parse_rejects_out_of_range_target_info() {
        let mut bytes = ChallengeMessage::new(SERVER_CHALLENGE, vec![1, 2, 3, 4]).to_bytes();
        // Claim a target info far longer than the message.
        bytes[40] = 0xff;
        assert_eq!(
            ChallengeMessage::parse(&bytes),
            Err(NtlmError::BufferOutOfRange { field: "target info" })
        );
    }

    #[test]
    fn test_server_timestamp_is_honoured() {
        let stamp: u64 = 0x01d0_0000_0000_0000;
        let mut info = vec![0x07, 0x00, 0x08, 0x00];
        info.extend_from_slice(&stamp.to_le_bytes());
        info.extend_from_slice(&[0, 0, 0, 0]);
        let challenge = ChallengeMessage::new(SERVER_CHALLENGE, info);
        assert_eq!(challenge.timestamp(), Some(stamp));

        let msg = authenticate_message(&credentials(), &challenge, CLIENT_CHALLENGE, 42).unwrap();
        let parsed = AuthenticateMessage::parse(&msg).unwrap();
        assert_eq!(parsed.lm_response, vec![0u8; 24]);
        assert_eq!(read_u64(&parsed.nt_response, 24), stamp);
    }

    #[test]
    fn test_authenticate_message_verifies_with_right_password() {
        let challenge = ChallengeMessage::new(SERVER_CHALLENGE, vec![0, 0, 0, 0]);
        let msg = authenticate_message(&credentials(), &challenge, CLIENT_CHALLENGE, 0).unwrap();

        let parsed = AuthenticateMessage::parse(&msg).unwrap();
        assert_eq!(parsed.username, "User");
        assert_eq!(parsed.domain, "Domain");
        assert!(parsed.verify("Password", &SERVER_CHALLENGE));
        assert!(!parsed.verify("password", &SERVER_CHALLENGE));
        assert!(!parsed.verify("Password", &[0u8; 8]));
    }

    #[test]
    fn test_header_round_trip() {
        let header = encode_header(&negotiate_message());
        let token = header.strip_prefix("NTLM ").unwrap();
        assert_eq!(decode_token(token).unwrap(), negotiate_message());
        assert!(matches!(decode_token("%%%"), Err(NtlmError::Base64(_))));
    }

    #[test]
    fn test_filetime_is_after_2020() {
        // 2020-01-01 as FILETIME.
        assert!(filetime_now() > 132_223_104_000_000_000);
    }
}
