//! Command line interface for the wharf server binary.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `wharf` binary.
#[derive(Debug, Parser)]
#[command(name = "wharf", version, about = "Anonymous FTP server backed by an in-memory tree")]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:2121")]
    pub listen: SocketAddr,

    /// PEM certificate chain enabling `AUTH TLS`.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching the certificate.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Lowest passive-mode port to hand out.
    #[arg(long)]
    pub pasv_min_port: Option<u16>,

    /// Highest passive-mode port to hand out.
    #[arg(long)]
    pub pasv_max_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_listen_address() {
        let cli = Cli::parse_from(["wharf", "--listen", "0.0.0.0:21"]);
        assert_eq!(cli.listen.port(), 21);
    }

    #[test]
    fn tls_flags_must_come_in_pairs() {
        assert!(Cli::try_parse_from(["wharf", "--tls-cert", "cert.pem"]).is_err());
    }
}
