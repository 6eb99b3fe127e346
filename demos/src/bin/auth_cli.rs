use xal_xcloud::{Error, Validity};
use xal_xcloud_demos::{auth_main, handle_args};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = handle_args();
    let (_, store) = auth_main(&args).await?;

    if let Some(sisu_token) = store.sisu_token() {
        println!(
            "Signed in as {} (valid for {}s)",
            sisu_token.gamertag().unwrap_or("<unknown>"),
            sisu_token.seconds_valid()
        );
    }

    Ok(())
}
