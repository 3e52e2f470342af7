//! Handshake payloads
//!
//! The three special packets that bracket session establishment: the
//! client's LoginRequest, the server's ConnectRequest (seeds, cookie,
//! assigned id), and the client's ConnectResponse echoing the cookie to the
//! activation endpoint. None of them carry the encrypted-checksum flag; the
//! keystreams they negotiate cover everything after.

use crate::codec::buffer::{WireReader, WireWriter};
use crate::error::CodecError;

/// On-wire size of the ConnectRequest body
pub const CONNECT_REQUEST_SIZE: usize = 32;

/// On-wire size of the ConnectResponse body
pub const CONNECT_RESPONSE_SIZE: usize = 8;

/// Authentication scheme: account + password
pub const AUTH_TYPE_ACCOUNT_PASSWORD: u32 = 0x0000_0002;

/// Auth flag bit 0: ask the server to enable checksum encryption
pub const AUTH_FLAG_ENABLE_CRYPTO: u32 = 0x0000_0001;

/// Handshake material sent by the server after a login request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectRequest {
    /// Server clock, seconds
    pub server_time: f64,
    /// Opaque token the client must echo back
    pub cookie: u64,
    /// Client id assigned for the rest of the session
    pub client_id: u16,
    /// Seed for the server-to-client keystream
    pub server_seed: u32,
    /// Seed for the client-to-server keystream
    pub client_seed: u32,
}

impl ConnectRequest {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let server_time = r.read_f64("connect.server_time")?;
        let cookie = r.read_u64("connect.cookie")?;
        // The id travels as a u32 but only the low half is meaningful.
        let client_id = r.read_u32("connect.client_id")? as u16;
        let server_seed = r.read_u32("connect.server_seed")?;
        let client_seed = r.read_u32("connect.client_seed")?;
        r.skip("connect.pad", 4)?;
        Ok(Self {
            server_time,
            cookie,
            client_id,
            server_seed,
            client_seed,
        })
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_f64(self.server_time);
        w.write_u64(self.cookie);
        w.write_u32(u32::from(self.client_id));
        w.write_u32(self.server_seed);
        w.write_u32(self.client_seed);
        w.write_u32(0);
    }
}

/// Credentials for the login payload
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub account: String,
    pub password: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
        }
    }
}

/// Build the LoginRequest payload: client version, a length-prefixed auth
/// block (auth type, flags, timestamp, account, admin override, password).
pub fn build_login_payload(version: &str, creds: &Credentials, timestamp: u32) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(64);
    w.write_pad_str16(version);

    let len_at = w.len();
    w.write_u32(0); // patched below

    let body_start = w.len();
    w.write_u32(AUTH_TYPE_ACCOUNT_PASSWORD);
    w.write_u32(AUTH_FLAG_ENABLE_CRYPTO);
    w.write_u32(timestamp);
    w.write_pad_str16(&creds.account.to_lowercase());
    w.write_pad_str16(""); // admin override
    w.write_login_str32(&creds.password);

    let body_len = (w.len() - body_start) as u32;
    w.patch_u32(len_at, body_len);
    w.into_vec()
}

/// Parse the LoginRequest payload (used by the loopback test peer and by
/// capture triage).
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRequest {
    pub version: String,
    pub auth_type: u32,
    pub auth_flags: u32,
    pub timestamp: u32,
    pub account: String,
    pub admin_override: String,
    pub password: String,
}

impl LoginRequest {
    pub fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let version = r.read_pad_str16("login.version")?;
        let _body_len = r.read_u32("login.body_len")?;
        let auth_type = r.read_u32("login.auth_type")?;
        let auth_flags = r.read_u32("login.auth_flags")?;
        let timestamp = r.read_u32("login.timestamp")?;
        let account = r.read_pad_str16("login.account")?;
        let admin_override = r.read_pad_str16("login.admin_override")?;
        let password = r.read_login_str32("login.password")?;
        Ok(Self {
            version,
            auth_type,
            auth_flags,
            timestamp,
            account,
            admin_override,
            password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_round_trip() {
        let cr = ConnectRequest {
            server_time: 123456.75,
            cookie: 0xDEAD_BEEF_CAFE_F00D,
            client_id: 0x1234,
            server_seed: 0xC838_24AB,
            client_seed: 0xFBD5_2C87,
        };
        let mut w = WireWriter::new();
        cr.write(&mut w);
        assert_eq!(w.len(), CONNECT_REQUEST_SIZE);

        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        assert_eq!(ConnectRequest::read(&mut r).unwrap(), cr);
        assert_eq!(r.offset(), CONNECT_REQUEST_SIZE);
    }

    #[test]
    fn test_connect_request_truncated() {
        let mut r = WireReader::new(&[0u8; 16]);
        let err = ConnectRequest::read(&mut r).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Truncated {
                field: "connect.client_id",
                ..
            }
        ));
    }

    #[test]
    fn test_login_payload_round_trip() {
        let creds = Credentials::new("TestAccount", "hunter2");
        let payload = build_login_payload("1802", &creds, 0);

        let mut r = WireReader::new(&payload);
        let login = LoginRequest::read(&mut r).unwrap();
        assert_eq!(login.version, "1802");
        assert_eq!(login.auth_type, AUTH_TYPE_ACCOUNT_PASSWORD);
        assert_eq!(login.auth_flags, AUTH_FLAG_ENABLE_CRYPTO);
        assert_eq!(login.account, "testaccount");
        assert_eq!(login.admin_override, "");
        assert_eq!(login.password, "hunter2");
        assert_eq!(r.offset(), payload.len());
    }

    #[test]
    fn test_login_payload_body_length_field() {
        let creds = Credentials::new("a", "b");
        let payload = build_login_payload("1802", &creds, 7);

        let mut r = WireReader::new(&payload);
        let _version = r.read_pad_str16("v").unwrap();
        let body_len = r.read_u32("len").unwrap() as usize;
        assert_eq!(r.remaining(), body_len);
    }
}
