//! Console commands.
//!
//! `Console` wires the session store, the guarded global fetch slot, the
//! sign-out trigger and the API client together, then runs one command.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use shiftguard_core::api::ReqwestFetch;
use shiftguard_core::guard::SessionGuard;
use shiftguard_core::utils::{format_remaining, truncate_string};
use shiftguard_core::{
    ApiClient, ChannelNavigator, Config, CredentialStore, FetchSlot, GuardHandle, SessionStore,
    SessionTerminator, SignOut, SignOutReason, WakeSignal,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const USAGE: &str = "\
Usage: shiftguard <command>

Commands:
  login [email]        Sign in and start a session
  logout               End the current session
  status               Show the current session
  get <path>           GET an API path and print the JSON response
  post <path> <json>   POST a JSON body to an API path
  watch                Keep the session guarded; press Enter to recheck expiry";

/// Longest display name shown by `status`
const MAX_NAME_WIDTH: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Logout,
    Status,
    Get { path: String },
    Post { path: String, body: String },
    Watch,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut args = args.iter().map(String::as_str);
        let command = match args.next() {
            Some("login") => Command::Login {
                email: args.next().map(str::to_string),
            },
            Some("logout") => Command::Logout,
            Some("status") => Command::Status,
            Some("get") => Command::Get {
                path: args.next().ok_or("get needs a path")?.to_string(),
            },
            Some("post") => Command::Post {
                path: args.next().ok_or("post needs a path")?.to_string(),
                body: args.next().ok_or("post needs a JSON body")?.to_string(),
            },
            Some("watch") => Command::Watch,
            Some(other) => return Err(format!("Unknown command: {}", other)),
            None => return Err("No command given".to_string()),
        };

        if let Some(extra) = args.next() {
            return Err(format!("Unexpected argument: {}", extra));
        }
        Ok(command)
    }
}

pub struct Console {
    config: Config,
    store: SessionStore,
    slot: Arc<FetchSlot>,
    navigator: ChannelNavigator,
    sign_out: Arc<SignOut<ChannelNavigator>>,
    client: ApiClient,
}

impl Console {
    pub fn new(config: Config) -> Result<Self> {
        let store = SessionStore::persistent(config.cache_dir()?);
        match store.load() {
            Ok(loaded) => debug!(loaded, "Session loaded"),
            Err(e) => warn!(error = %e, "Failed to load saved session"),
        }

        let raw = Arc::new(ReqwestFetch::new()?);
        let slot = FetchSlot::init_global(raw.clone());
        let navigator = ChannelNavigator::new();
        let sign_out = Arc::new(SignOut::new(
            store.clone(),
            navigator.clone(),
            config.login_path.clone(),
        ));
        let client = ApiClient::new(slot.clone(), store.clone(), &config).with_exchange(raw);

        Ok(Self {
            config,
            store,
            slot,
            navigator,
            sign_out,
            client,
        })
    }

    pub async fn run(mut self, command: Command) -> Result<()> {
        match command {
            Command::Login { email } => self.login(email).await,
            Command::Logout => self.logout(),
            Command::Status => {
                self.status();
                Ok(())
            }
            Command::Get { path } => {
                let _guard = self.mount(None);
                let result = self.client.get_json::<serde_json::Value>(&path).await;
                self.print_result(result)
            }
            Command::Post { path, body } => {
                let body: serde_json::Value =
                    serde_json::from_str(&body).context("Request body is not valid JSON")?;
                let _guard = self.mount(None);
                let result = self.client.post_json::<serde_json::Value, _>(&path, &body).await;
                self.print_result(result)
            }
            Command::Watch => self.watch().await,
        }
    }

    fn mount(&self, signals: Option<mpsc::Receiver<WakeSignal>>) -> GuardHandle {
        let terminator: Arc<dyn SessionTerminator> = self.sign_out.clone();
        SessionGuard::mount(&self.slot, &self.store, terminator, signals)
    }

    async fn login(&mut self, email: Option<String>) -> Result<()> {
        let email = match email {
            Some(email) => email,
            None => self.prompt_email()?,
        };

        let credentials = CredentialStore::new();
        let password = if credentials.has_password(&email) {
            print!("Use stored password? [Y/n]: ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;

            if input.trim().to_lowercase() != "n" {
                credentials.password(&email)?
            } else {
                Self::prompt_password()?
            }
        } else {
            Self::prompt_password()?
        };

        println!("\nAuthenticating...");
        let session = self.client.login(&email, &password).await?;

        if let Err(e) = credentials.store(&email, &password) {
            warn!(error = %e, "Failed to store credentials");
        }

        self.config.last_email = Some(email);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        println!(
            "Signed in as {} (session ends in {})",
            session.display_name,
            format_remaining(session.time_until_expiry())
        );
        Ok(())
    }

    fn prompt_email(&self) -> Result<String> {
        match self.config.last_email {
            Some(ref last) => print!("Email [{}]: ", last),
            None => print!("Email: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        match (&self.config.last_email, input.is_empty()) {
            (Some(last), true) => Ok(last.clone()),
            (None, true) => Err(anyhow::anyhow!("Email is required")),
            _ => Ok(input.to_string()),
        }
    }

    fn prompt_password() -> Result<String> {
        let password = rpassword::prompt_password("Password: ")?;
        Ok(password)
    }

    fn logout(&self) -> Result<()> {
        let email = self
            .store
            .current()
            .map(|s| s.email)
            .or_else(|| self.config.last_email.clone());

        self.sign_out.terminate(SignOutReason::UserRequested);

        if let Some(email) = email {
            let credentials = CredentialStore::new();
            if credentials.has_password(&email) {
                if let Err(e) = credentials.forget(&email) {
                    warn!(error = %e, "Failed to delete stored credentials");
                }
            }
        }

        println!("Signed out.");
        Ok(())
    }

    fn status(&self) {
        match self.store.current() {
            Some(session) if !session.is_expired() => {
                println!(
                    "Signed in as {} <{}>",
                    truncate_string(&session.display_name, MAX_NAME_WIDTH),
                    session.email
                );
                println!("Subject:  {}", session.subject_id);
                println!(
                    "Expires:  {} ({} left)",
                    session.expires_at.to_rfc3339(),
                    format_remaining(session.time_until_expiry())
                );
            }
            Some(_) => {
                // Expired while nobody was watching
                self.sign_out.terminate(SignOutReason::ExpiryRecheck);
                self.report_sign_out();
            }
            None => println!("Not signed in. Run `shiftguard login`."),
        }
    }

    fn print_result(&self, result: Result<serde_json::Value>) -> Result<()> {
        let outcome = match result {
            Ok(value) => {
                println!("{}", serde_json::to_string_pretty(&value)?);
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.report_sign_out();
        outcome
    }

    /// Tell the user where to go when the guard ended their session
    fn report_sign_out(&self) {
        if let Some(path) = self.navigator.last_redirect() {
            eprintln!(
                "Session expired. Sign in again ({}): run `shiftguard login`.",
                path
            );
        }
    }

    async fn watch(&self) -> Result<()> {
        let Some(session) = self.store.current() else {
            println!("Not signed in. Run `shiftguard login`.");
            return Ok(());
        };

        let (tx, rx) = mpsc::channel(8);
        let mut expired = self.navigator.subscribe();
        let handle = self.mount(Some(rx));

        // Detached thread: a blocked stdin read cannot be cancelled
        std::thread::Builder::new()
            .name("stdin-wake".to_string())
            .spawn(move || forward_wake_lines(io::stdin().lock(), tx))
            .context("Failed to start stdin reader")?;

        println!(
            "Watching session for {} (ends in {}). Press Enter to recheck.",
            session.display_name,
            format_remaining(session.time_until_expiry())
        );

        let changed = expired.changed().await;
        handle.unmount();

        match changed {
            Ok(()) => {
                info!("Session ended while watching");
                self.report_sign_out();
                Ok(())
            }
            Err(_) => Err(anyhow::anyhow!("Sign-out channel closed unexpectedly")),
        }
    }
}

/// Send a focus signal for each line read until the input ends or the
/// watcher stops listening. Blocks the calling thread.
fn forward_wake_lines(reader: impl BufRead, tx: mpsc::Sender<WakeSignal>) {
    for line in reader.lines() {
        if line.is_err() || tx.blocking_send(WakeSignal::Focus).is_err() {
            break;
        }
    }
    debug!("Stopped reading wake signals from stdin");
}
