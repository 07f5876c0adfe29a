//! Data-channel setup verbs.
//!
//! `PORT`/`EPRT` record an explicit active target; `PASV`/`EPSV` switch the
//! connection into passive mode. The first family a session uses locks out
//! the other.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;

use crate::{
    error::ProtocolError,
    handler::{CommandContext, CommandHandler},
    reply::Reply,
};

/// Parse the classic `h1,h2,h3,h4,p1,p2` form of `PORT`.
fn parse_port_argument(argument: &str) -> Option<SocketAddr> {
    let mut numbers = [0u8; 6];
    let mut count = 0;
    for part in argument.split(',') {
        if count == numbers.len() {
            return None;
        }
        numbers[count] = part.trim().parse().ok()?;
        count += 1;
    }
    if count != numbers.len() {
        return None;
    }

    let ip = Ipv4Addr::new(numbers[0], numbers[1], numbers[2], numbers[3]);
    let port = u16::from(numbers[4]) << 8 | u16::from(numbers[5]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

enum ExtendedTarget {
    Address(SocketAddr),
    UnknownProtocol(String),
}

/// Parse the RFC 2428 `|proto|addr|port|` form of `EPRT`.
fn parse_eprt_argument(argument: &str) -> Option<ExtendedTarget> {
    let mut chars = argument.chars();
    let delimiter = chars.next()?;
    let mut fields = argument[delimiter.len_utf8()..].split(delimiter);

    let protocol = fields.next()?;
    let address = fields.next()?;
    let port: u16 = fields.next()?.parse().ok()?;

    let ip: IpAddr = match protocol {
        "1" | "2" => address.parse().ok()?,
        other => return Some(ExtendedTarget::UnknownProtocol(other.to_owned())),
    };
    Some(ExtendedTarget::Address(SocketAddr::new(ip, port)))
}

/// `PORT` and `EPRT`.
pub struct PortHandler;

#[async_trait]
impl CommandHandler for PortHandler {
    fn names(&self) -> &'static [&'static str] { &["PORT", "EPRT"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let verb = context.command().verb().to_ascii_uppercase();
        if let Err(previous) = context.session().lock_transfer_verb(&verb) {
            return Ok(Some(Reply::new(
                500,
                format!("Cannot use {verb} when {previous} was used before."),
            )));
        }

        let argument = context.command().argument();
        let target = if verb == "EPRT" {
            match parse_eprt_argument(argument) {
                Some(ExtendedTarget::Address(address)) => address,
                Some(ExtendedTarget::UnknownProtocol(protocol)) => {
                    return Ok(Some(Reply::new(
                        522,
                        format!("Extended port failure - unknown network protocol {protocol}."),
                    )));
                }
                None => {
                    return Ok(Some(Reply::new(
                        501,
                        context.text("Syntax error in parameters or arguments."),
                    )));
                }
            }
        } else {
            match parse_port_argument(argument) {
                Some(address) => address,
                None => {
                    return Ok(Some(Reply::new(
                        501,
                        context.text("Syntax error in parameters or arguments."),
                    )));
                }
            }
        };

        context.session().data().lock().await.use_active(Some(target));
        Ok(Some(Reply::new(200, context.text("Command okay."))))
    }
}

/// `PASV` and `EPSV`.
pub struct PasvHandler;

#[async_trait]
impl CommandHandler for PasvHandler {
    fn names(&self) -> &'static [&'static str] { &["PASV", "EPSV"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let verb = context.command().verb().to_ascii_uppercase();
        if let Err(previous) = context.session().lock_transfer_verb(&verb) {
            return Ok(Some(Reply::new(
                500,
                format!("Cannot use {verb} when {previous} was used before."),
            )));
        }

        let advertised = context.session().data().lock().await.use_passive(None).await?;

        if verb == "EPSV" {
            return Ok(Some(Reply::new(
                229,
                format!("Entering Extended Passive Mode (|||{}|).", advertised.port()),
            )));
        }

        match advertised.ip() {
            IpAddr::V4(ip) => {
                let [a, b, c, d] = ip.octets();
                let port = advertised.port();
                Ok(Some(Reply::new(
                    227,
                    format!(
                        "Entering Passive Mode ({a},{b},{c},{d},{},{}).",
                        port >> 8,
                        port & 0xFF,
                    ),
                )))
            }
            IpAddr::V6(_) => Ok(Some(Reply::new(
                522,
                context.text("Network protocol not supported, use EPSV."),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{ExtendedTarget, parse_eprt_argument, parse_port_argument};

    #[rstest]
    #[case("127,0,0,1,4,1", "127.0.0.1:1025")]
    #[case("10,0,0,2,195,80", "10.0.0.2:50000")]
    fn parses_port_arguments(#[case] argument: &str, #[case] expected: &str) {
        let address = parse_port_argument(argument).expect("argument is valid");
        assert_eq!(address, expected.parse().expect("literal address parses"));
    }

    #[rstest]
    #[case("127,0,0,1,4")]
    #[case("127,0,0,1,4,1,9")]
    #[case("127,0,0,256,4,1")]
    #[case("not,numbers,at,all,0,0")]
    fn rejects_malformed_port_arguments(#[case] argument: &str) {
        assert!(parse_port_argument(argument).is_none());
    }

    #[rstest]
    #[case("|1|132.235.1.2|6275|", "132.235.1.2:6275")]
    #[case("|2|::1|6446|", "[::1]:6446")]
    fn parses_eprt_arguments(#[case] argument: &str, #[case] expected: &str) {
        match parse_eprt_argument(argument) {
            Some(ExtendedTarget::Address(address)) => {
                assert_eq!(address, expected.parse().expect("literal address parses"));
            }
            _ => panic!("expected an address for {argument}"),
        }
    }

    #[test]
    fn eprt_reports_unknown_protocols() {
        match parse_eprt_argument("|3|x|1|") {
            Some(ExtendedTarget::UnknownProtocol(protocol)) => assert_eq!(protocol, "3"),
            _ => panic!("expected an unknown-protocol result"),
        }
    }

    #[test]
    fn eprt_rejects_malformed_arguments() {
        assert!(parse_eprt_argument("").is_none());
        assert!(parse_eprt_argument("|1|127.0.0.1|notaport|").is_none());
    }
}
