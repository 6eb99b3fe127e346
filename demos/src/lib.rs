use clap::Parser;
use env_logger::Env;
use log::{error, info};
use xal_xcloud::{CliCallbackHandler, Error, TokenStore, XalClient};

/// Common cli arguments
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
pub struct Cli {
    /// Increase message verbosity ('-v' -> debug, '-vv' -> trace)
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Filepath to tokenstore JSON
    /// If it doesn't exists, it will be created upon successful authentication
    #[arg(short, long, default_value = "tokens.json")]
    pub token_filepath: String,

    /// IP sent as x-forwarded-for to the streaming service to pin its region
    #[arg(long)]
    pub force_region_ip: Option<String>,

    /// Preferred streaming region, e.g. "WestEurope"
    #[arg(long)]
    pub region: Option<String>,
}

pub fn get_loglevel(verbosity: u8) -> String {
    let default_loglevel = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    default_loglevel.to_string()
}

pub fn handle_args() -> Cli {
    let args = Cli::parse();
    let default_loglevel = get_loglevel(args.verbosity);
    env_logger::Builder::from_env(Env::default().default_filter_or(default_loglevel)).init();

    args
}

/// Entrypoint for demos
///
/// Loads the token store, refreshes stale tokens and falls back to
/// interactive authentication if refreshing is not possible.
pub async fn auth_main(args: &Cli) -> Result<(XalClient, TokenStore), Error> {
    let mut client = XalClient::with_defaults()?.with_force_region_ip(args.force_region_ip.clone());

    let mut store = TokenStore::default();
    store.load(&args.token_filepath, true)?;
    client.load_keys_from_store(&store)?;

    if store.has_valid_auth_tokens() {
        info!("Tokens still valid");
        return Ok((client, store));
    }

    if store.user_token().is_some() {
        match client.refresh_tokens(&mut store).await {
            Ok(_) => {
                info!("Tokens refreshed succesfully");
                return Ok((client, store));
            }
            Err(err) => error!("Refreshing tokens failed err={err}"),
        }
    }

    info!("Authentication via SISU");
    if !client
        .authenticate_interactive(&mut store, &CliCallbackHandler)
        .await?
    {
        return Err(Error::GeneralError("Authentication was rejected".into()));
    }

    Ok((client, store))
}
