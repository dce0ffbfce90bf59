use anyhow::Result;
use clap::{Args, Subcommand};
use std::io::{self, IsTerminal, Read};

use crate::config::GlobalConfig;
use crate::eth::EvmSigner;

#[derive(Args, Clone, Debug)]
pub struct KeyCommandArgs {
    #[command(subcommand)]
    command: KeyCommands,
}

#[derive(Subcommand, Clone, Debug)]
enum KeyCommands {
    /// Display the address for the current key
    ///
    /// The key comes from --key / X402_KEY, or from stdin when piped.
    Address,
}

pub async fn run(args: KeyCommandArgs, config: &GlobalConfig) -> Result<()> {
    let signer = match config.load_signer()? {
        Some(signer) => signer,
        None => signer_from_stdin()?,
    };

    match args.command {
        KeyCommands::Address => println!("{}", signer.address()),
    }
    Ok(())
}

fn signer_from_stdin() -> Result<EvmSigner> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        anyhow::bail!("No key provided. Use --key, set X402_KEY, or pipe the key to stdin");
    }
    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    EvmSigner::from_hex(&buffer).map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))
}
