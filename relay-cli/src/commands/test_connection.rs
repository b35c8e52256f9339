use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use relay_daemon::PlatformKind;

use super::PlatformArgs;

#[derive(Args, Debug)]
pub struct TestConnectionArgs {
    /// Platform to check (botapi, webhook)
    platform: PlatformKind,

    #[command(flatten)]
    credentials: PlatformArgs,
}

impl TestConnectionArgs {
    pub fn run(self) -> Result<()> {
        let sender = self.credentials.into_config().build_sender(self.platform)?;
        sender
            .test_connection()
            .with_context(|| format!("{} connection test failed", self.platform))?;
        println!("{} {} connection ok", "✓".green(), self.platform);
        Ok(())
    }
}
