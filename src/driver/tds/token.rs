use crate::driver::DriverError;

const TOKEN_ERROR: u8 = 0xAA;
const TOKEN_INFO: u8 = 0xAB;
const TOKEN_LOGINACK: u8 = 0xAD;
const TOKEN_FEATUREEXTACK: u8 = 0xAE;
const TOKEN_ENVCHANGE: u8 = 0xE3;
const TOKEN_DONE: u8 = 0xFD;
const TOKEN_DONEPROC: u8 = 0xFE;
const TOKEN_DONEINPROC: u8 = 0xFF;

// status (u16) + current command (u16) + row count (u64)
const DONE_LEN: usize = 12;

/// What the scanner found in a server response
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub login_ack: bool,
    /// `ERROR` tokens seen before the scan stopped
    pub errors: Vec<ServerError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub number: i32,
    pub state: u8,
    pub class: u8,
    pub message: String,
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        Self::Server {
            number: err.number,
            state: err.state,
            class: err.class,
            message: err.message,
        }
    }
}

impl Response {
    /// Turn the first server error into a `DriverError`
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Server` if the response carried an `ERROR` token
    pub fn into_result(self) -> Result<Self, DriverError> {
        match self.errors.first() {
            Some(err) => Err(err.clone().into()),
            None => Ok(self),
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DriverError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or_else(|| DriverError::Protocol("truncated token stream".to_string()))?;
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DriverError> {
        self.take(1).map(|b| b.first().copied().unwrap_or_default())
    }

    fn u16(&mut self) -> Result<u16, DriverError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([
            bytes.first().copied().unwrap_or_default(),
            bytes.get(1).copied().unwrap_or_default(),
        ]))
    }

    fn u32(&mut self) -> Result<u32, DriverError> {
        let lo = u32::from(self.u16()?);
        let hi = u32::from(self.u16()?);
        Ok(lo | (hi << 16))
    }

    fn i32(&mut self) -> Result<i32, DriverError> {
        Ok(i32::from_le_bytes(self.u32()?.to_le_bytes()))
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

fn utf16_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| match pair {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => 0,
        })
        .collect();
    String::from_utf16_lossy(&units)
}

fn parse_error(body: &[u8]) -> Result<ServerError, DriverError> {
    let mut reader = Reader::new(body);
    let number = reader.i32()?;
    let state = reader.u8()?;
    let class = reader.u8()?;
    let chars = usize::from(reader.u16()?);
    let message = utf16_string(reader.take(chars * 2)?);
    Ok(ServerError {
        number,
        state,
        class,
        message,
    })
}

/// Scan a tabular result for `LOGINACK` and `ERROR` tokens.
///
/// Tokens the probe does not need (column metadata, rows, ...) end the scan:
/// by then the server has answered and any error would have come first.
///
/// # Errors
///
/// Returns an error if a known token is truncated
pub fn scan(payload: &[u8]) -> Result<Response, DriverError> {
    let mut reader = Reader::new(payload);
    let mut response = Response::default();

    while !reader.is_empty() {
        match reader.u8()? {
            TOKEN_ERROR => {
                let len = usize::from(reader.u16()?);
                response.errors.push(parse_error(reader.take(len)?)?);
            }
            TOKEN_LOGINACK => {
                let len = usize::from(reader.u16()?);
                reader.take(len)?;
                response.login_ack = true;
            }
            TOKEN_INFO | TOKEN_ENVCHANGE => {
                let len = usize::from(reader.u16()?);
                reader.take(len)?;
            }
            TOKEN_FEATUREEXTACK => loop {
                let feature = reader.u8()?;
                if feature == 0xFF {
                    break;
                }
                let len = usize::try_from(reader.u32()?).unwrap_or(usize::MAX);
                reader.take(len)?;
            },
            TOKEN_DONE | TOKEN_DONEPROC | TOKEN_DONEINPROC => {
                reader.take(DONE_LEN)?;
            }
            _ => break,
        }
    }

    Ok(response)
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )]

    use super::*;

    /// Build an `ERROR` token the way SQL Server sends it
    pub(crate) fn error_token(number: i32, message: &str) -> Vec<u8> {
        let text: Vec<u8> = message.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut body = Vec::new();
        body.extend_from_slice(&number.to_le_bytes());
        body.push(1); // state
        body.push(14); // class
        body.extend_from_slice(&u16::try_from(text.len() / 2).unwrap().to_le_bytes());
        body.extend_from_slice(&text);
        body.push(0); // server name (B_VARCHAR)
        body.push(0); // procedure name
        body.extend_from_slice(&1u32.to_le_bytes()); // line number

        let mut token = vec![TOKEN_ERROR];
        token.extend_from_slice(&u16::try_from(body.len()).unwrap().to_le_bytes());
        token.extend_from_slice(&body);
        token
    }

    pub(crate) fn done_token() -> Vec<u8> {
        let mut token = vec![TOKEN_DONE];
        token.extend_from_slice(&[0u8; DONE_LEN]);
        token
    }

    #[test]
    fn test_scan_login_failed() {
        let mut payload = error_token(18456, "Login failed for user ''.");
        payload.extend_from_slice(&done_token());

        let response = scan(&payload).unwrap();
        assert!(!response.login_ack);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].number, 18456);
        assert_eq!(response.errors[0].message, "Login failed for user ''.");

        match response.into_result() {
            Err(DriverError::Server { number, class, .. }) => {
                assert_eq!(number, 18456);
                assert_eq!(class, 14);
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn test_scan_login_ack() {
        let mut payload = vec![TOKEN_ENVCHANGE, 0x03, 0x00, 0x01, 0x00, 0x00];
        payload.extend_from_slice(&[TOKEN_LOGINACK, 0x02, 0x00, 0xAA, 0xBB]);
        payload.extend_from_slice(&done_token());

        let response = scan(&payload).unwrap().into_result().unwrap();
        assert!(response.login_ack);
        assert!(response.errors.is_empty());
    }

    #[test]
    fn test_scan_feature_ext_ack() {
        let mut payload = vec![TOKEN_LOGINACK, 0x00, 0x00];
        payload.extend_from_slice(&[TOKEN_FEATUREEXTACK, 0x04, 0x01, 0x00, 0x00, 0x00, 0x01]);
        payload.push(0xFF);
        payload.extend_from_slice(&done_token());

        let response = scan(&payload).unwrap();
        assert!(response.login_ack);
    }

    #[test]
    fn test_scan_stops_at_unknown_token() {
        // COLMETADATA starts a result set the probe does not decode
        let payload = [0x81, 0x01, 0x00, 0xde, 0xad];
        let response = scan(&payload).unwrap();
        assert_eq!(response, Response::default());
    }

    #[test]
    fn test_scan_truncated() {
        let payload = [TOKEN_ERROR, 0x20, 0x00, 0x01];
        assert!(matches!(scan(&payload), Err(DriverError::Protocol(_))));
    }
}
