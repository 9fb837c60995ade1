use autossl_core::CredentialVault;
use clap::Args;

#[derive(Args)]
pub struct GenerateKeyCommand {}

impl GenerateKeyCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        println!("{}", CredentialVault::generate_key());
        Ok(())
    }
}
