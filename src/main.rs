//! Anonymous FTP server over an in-memory filesystem.

mod cli;

use std::sync::Arc;

use clap::Parser;
use wharf::{
    AnonymousAuthorizer, Authorizer, ConnectionConfig, MemoryFilesystem, Server,
    SimplePasvAddressResolver, TlsIdentity, commands::default_registry, data::PasvOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();

    let filesystem = MemoryFilesystem::new();
    filesystem.seed_dir("/pub");
    filesystem.seed_file("/welcome.txt", b"Welcome to wharf.\r\n".to_vec());

    let mut config = ConnectionConfig::new(Arc::new(default_registry()));
    config.resolver = Arc::new(SimplePasvAddressResolver::new(PasvOptions {
        min_port: cli.pasv_min_port,
        max_port: cli.pasv_max_port,
        public_address: None,
    }));
    if let (Some(cert), Some(key)) = (&cli.tls_cert, &cli.tls_key) {
        config.tls = Some(TlsIdentity::from_pem_files(cert, key)?);
    }

    let authorizers = Arc::new(move || {
        Arc::new(AnonymousAuthorizer::new(Arc::new(filesystem.clone()))) as Arc<dyn Authorizer>
    });

    Server::new(config, authorizers)
        .bind(cli.listen)
        .await?
        .run()
        .await?;
    Ok(())
}
