//! Sending a signed http request to XBL userpresence API
//!
use xal_xcloud::{
    cvlib::CorrelationVector,
    extensions::{CorrelationVectorRequestBuilder, LoggingHttpMessage, SigningRequest},
    Error, HttpTransport, KeyManager, ReqwestTransport, RequestSigner,
};
use xal_xcloud_demos::{auth_main, handle_args};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = handle_args();
    let (mut client, store) = auth_main(&args).await?;

    let web_token = client.get_web_token(&store).await?;
    let keys = KeyManager::from_jwt_keys(
        store
            .jwt_keys()
            .ok_or(Error::GeneralError("No proof key persisted".into()))?,
    )?;

    // Request will get signed and MS-CV header populated
    let mut cv = CorrelationVector::new();
    let request = http::Request::get("https://userpresence.xboxlive.com/users/me?level=all")
        .header("x-xbl-contract-version", "3")
        .header("Authorization", web_token.authorization_header_value()?)
        .add_cv(&mut cv)?
        .body(Vec::new())?
        .sign(&RequestSigner::new(), &keys, None)?
        .log();

    let response = ReqwestTransport::new()?.send(request).await?.log();
    println!("{}", String::from_utf8_lossy(response.body()));
    Ok(())
}
