//! Fetch game streaming tokens and list the available regions
//!
use xal_xcloud::{Error, Validity};
use xal_xcloud_demos::{auth_main, handle_args};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = handle_args();
    let (mut client, store) = auth_main(&args).await?;

    let mut tokens = client.get_streaming_token(&store).await?;
    if let Some(region) = &args.region {
        if !tokens.xhome.set_default_region(region) {
            log::warn!("Unknown region {region}, keeping server default");
        }
    }

    for (name, token) in [("xhome", &tokens.xhome), ("xcloud", &tokens.xcloud)] {
        println!(
            "{name}: market={} valid={}s",
            token.market(),
            token.seconds_valid()
        );
        for region in token.regions() {
            let marker = if region.is_default { "*" } else { " " };
            println!("  {marker} {} {}", region.name, region.base_uri);
        }
    }

    let msal = client.get_msal_token(&store).await?;
    println!("Transfer token for user {}", msal.user_id);
    Ok(())
}
