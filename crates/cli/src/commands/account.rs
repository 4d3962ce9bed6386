//! Account Commands

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::client::{AuthResponse, WebClient};
use crate::output::{print_info, print_item, print_success, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct Credentials {
    /// Account email
    pub email: String,

    /// Account password
    #[arg(short, long, env = "CRAFTCLOUD_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Serialize)]
pub struct AccountDisplay {
    pub id: String,
    pub email: String,
    pub name: String,
    pub server_id: Option<String>,
    pub demo_expires_at: Option<String>,
}

impl TableDisplay for AccountDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Email", "Name", "Server", "Demo Expires"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.email.clone(),
            self.name.clone(),
            self.server_id.clone().unwrap_or_else(|| "-".to_string()),
            self.demo_expires_at.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

impl From<AuthResponse> for AccountDisplay {
    fn from(resp: AuthResponse) -> Self {
        Self {
            id: resp.user.id,
            email: resp.user.email,
            name: resp.user.name,
            server_id: resp.server_id,
            demo_expires_at: resp.demo_expires_at,
        }
    }
}

pub async fn register(
    creds: Credentials,
    demo: bool,
    mut client: WebClient,
    format: OutputFormat,
) -> Result<()> {
    let resp = client.register(&creds.email, &creds.password, demo).await?;
    client.save_token(&resp.token)?;

    print_success(&format!("Registered {}", resp.user.email));
    if demo && resp.server_id.is_some() {
        print_info("Your demo server is being set up; it starts on its own once installed");
    }
    print_item(&AccountDisplay::from(resp), format);
    Ok(())
}

pub async fn login(creds: Credentials, mut client: WebClient, format: OutputFormat) -> Result<()> {
    let resp = client.login(&creds.email, &creds.password).await?;
    client.save_token(&resp.token)?;

    print_success(&format!("Signed in as {}", resp.user.email));
    print_item(&AccountDisplay::from(resp), format);
    Ok(())
}

pub async fn logout(mut client: WebClient) -> Result<()> {
    client.logout().await?;
    client.clear_token()?;
    print_success("Signed out");
    Ok(())
}

pub async fn whoami(client: WebClient, format: OutputFormat) -> Result<()> {
    let session = client.session().await?;
    match session.user {
        Some(user) => print_item(
            &AccountDisplay {
                id: user.id,
                email: user.email,
                name: user.name,
                server_id: session.server_id,
                demo_expires_at: None,
            },
            format,
        ),
        None => print_info("Not signed in"),
    }
    Ok(())
}
