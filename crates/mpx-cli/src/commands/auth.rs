//! API key setup

use super::print_json;
use anyhow::{bail, Result};
use mpx_client::{
    setup_api_key, CredentialStore, HttpClient, MockClient, MpxConfig, RemoteClient,
};

pub fn run(key: &str, config: &MpxConfig, mock: bool) -> Result<()> {
    let Some(store) = CredentialStore::default_location() else {
        bail!("Cannot locate the home directory to store credentials");
    };

    let outcome = setup_api_key(key, &store, |key| {
        let client: Box<dyn RemoteClient> = if mock {
            Box::new(MockClient::canned())
        } else {
            Box::new(HttpClient::new(&config.api_url, key, config.request_timeout))
        };
        Ok(client)
    });

    print_json(&outcome)?;
    if !outcome.is_success() {
        bail!(outcome.message);
    }
    println!("Credentials saved to {}", store.path().display());
    Ok(())
}
