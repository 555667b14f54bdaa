use owo_colors::OwoColorize;

use motionlink_device::serial::{find_flash_volume, flash_firmware};

use crate::cli::FlashArgs;
use crate::error::CliError;

pub async fn handle(args: FlashArgs) -> Result<(), CliError> {
    let volume = match args.volume {
        Some(volume) => volume,
        None => find_flash_volume().ok_or(CliError::NoDevice)?,
    };

    let image = tokio::fs::read(&args.image).await?;
    println!(
        "Flashing {} ({} bytes) to {} ...",
        args.image.display(),
        image.len(),
        volume.display()
    );

    flash_firmware(&volume, &image).await?;
    println!("{}", "Flash complete. The board will reset.".green());
    Ok(())
}
