//! Terminal front end: turns typed commands into session, profile and event
//! calls and renders what comes back. Holds view state only.

pub mod render;

use uuid::Uuid;

use crate::error::AppError;
use crate::events::{EventAccess, EventBoard, RegisterOutcome};
use crate::identity::{SessionManager, SessionState};
use crate::profile::{Profile, ProfileAccess, ProfileUpdate};

pub const HELP: &str = "\
Commands:
  signin <email> <password>               sign in
  signup <email> <password> <full name>   create an account
  signout                                 sign out
  profile                                 show your profile
  set <field> <value...>                  edit one profile field (full_name, phone, department, year, bio)
  clear <field>                           clear an optional profile field
  events                                  list upcoming events
  register <n>                            register for event number n from `events`
  refresh                                 reload profile and events
  status                                  show who is signed in
  help                                    show this help
  quit | exit                             leave
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SignIn { email: String, password: String },
    SignUp { email: String, password: String, full_name: String },
    SignOut,
    Profile,
    Edit(ProfileUpdate),
    Events,
    Register(usize),
    Refresh,
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();
    match head.to_ascii_lowercase().as_str() {
        "signin" | "login" => match args.as_slice() {
            [email, password] => Ok(Command::SignIn { email: email.to_string(), password: password.to_string() }),
            _ => Err("usage: signin <email> <password>".into()),
        },
        "signup" => match args.as_slice() {
            [email, password, name @ ..] if !name.is_empty() => Ok(Command::SignUp {
                email: email.to_string(),
                password: password.to_string(),
                full_name: name.join(" "),
            }),
            _ => Err("usage: signup <email> <password> <full name>".into()),
        },
        "signout" | "logout" => Ok(Command::SignOut),
        "profile" => Ok(Command::Profile),
        "set" => {
            let Some((field, value)) = rest.split_once(char::is_whitespace) else {
                return Err("usage: set <field> <value...>".into());
            };
            let mut update = ProfileUpdate::default();
            update.set(field, value.trim()).map_err(|e| e.message().to_string())?;
            Ok(Command::Edit(update))
        }
        "clear" => match args.as_slice() {
            [field] => {
                let mut update = ProfileUpdate::default();
                update.set(field, "").map_err(|e| e.message().to_string())?;
                Ok(Command::Edit(update))
            }
            _ => Err("usage: clear <field>".into()),
        },
        "events" => Ok(Command::Events),
        "register" => match args.as_slice() {
            [n] => n
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(Command::Register)
                .ok_or_else(|| format!("not an event number: {}", n)),
            _ => Err("usage: register <n>".into()),
        },
        "refresh" => Ok(Command::Refresh),
        "status" => Ok(Command::Status),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "" => Err(String::new()),
        other => Err(format!("unknown command: {} (try `help`)", other)),
    }
}

/// View state of the signed-in dashboard.
struct Dashboard {
    profile: Option<Profile>,
    board: EventBoard,
}

pub struct Portal {
    session: SessionManager,
    dashboard: Option<Dashboard>,
}

fn describe(e: &AppError) -> String {
    format!("error: {}\n", e.message())
}

impl Portal {
    pub fn new(session: SessionManager) -> Self {
        Self { session, dashboard: None }
    }

    pub fn session(&self) -> &SessionManager { &self.session }

    pub fn is_signed_in(&self) -> bool { self.dashboard.is_some() }

    /// Rebuild the view for a new session state: load the dashboard when an
    /// identity appears, drop it when it goes away.
    pub async fn sync(&mut self, state: &SessionState) {
        match &state.identity {
            None => self.dashboard = None,
            Some(identity) => {
                let same = self.dashboard.as_ref().map(|d| d.board.identity().id) == Some(identity.id);
                if !same {
                    let board = EventBoard::new(EventAccess::new(self.session.client()), identity.clone());
                    self.dashboard = Some(Dashboard { profile: None, board });
                    self.reload().await;
                }
            }
        }
    }

    async fn reload(&mut self) {
        let client = self.session.client();
        let Some(dash) = self.dashboard.as_mut() else { return; };
        let identity = dash.board.identity().clone();
        dash.profile = match ProfileAccess::new(client).get_current_profile(&identity).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(target: "cli", "profile unavailable: {}", e);
                None
            }
        };
        dash.board.refresh().await;
    }

    pub fn prompt(&self) -> String {
        let st = self.session.state();
        match (st.loading, st.identity) {
            (true, _) => "portal (loading)> ".to_string(),
            (false, Some(i)) => format!("portal [{}]> ", i.email),
            (false, None) => "portal> ".to_string(),
        }
    }

    /// Run one command and return the text to show.
    pub async fn execute(&mut self, cmd: Command) -> String {
        match cmd {
            Command::Help => HELP.to_string(),
            Command::Quit => String::new(),
            Command::Status => match self.session.identity() {
                Some(i) => format!("signed in as {} ({})\n", i.email, i.id),
                None => "signed out\n".to_string(),
            },
            Command::SignIn { email, password } => match self.session.sign_in(&email, &password).await {
                Ok(i) => {
                    self.sync(&self.session.state()).await;
                    format!("welcome back, {}\n", i.email)
                }
                Err(e) => describe(&e),
            },
            Command::SignUp { email, password, full_name } => {
                match self.session.sign_up(&email, &password, &full_name).await {
                    Ok(_) => {
                        self.sync(&self.session.state()).await;
                        format!("account created, welcome {}\n", full_name)
                    }
                    Err(e) => describe(&e),
                }
            }
            Command::SignOut => {
                let out = match self.session.sign_out().await {
                    Ok(()) => "signed out\n".to_string(),
                    Err(e) => format!("signed out locally; {}", describe(&e)),
                };
                self.sync(&self.session.state()).await;
                out
            }
            Command::Profile => match self.dashboard.as_ref() {
                None => "sign in first\n".to_string(),
                Some(Dashboard { profile: Some(p), .. }) => render::render_profile(p),
                Some(_) => "profile not available yet; try `refresh`\n".to_string(),
            },
            Command::Edit(update) => self.edit(update).await,
            Command::Events => match self.dashboard.as_ref() {
                None => "sign in first\n".to_string(),
                Some(d) => render::render_events(d.board.events(), d.board.registered()),
            },
            Command::Register(n) => self.register(n).await,
            Command::Refresh => {
                if self.dashboard.is_none() {
                    return "sign in first\n".to_string();
                }
                self.reload().await;
                "refreshed\n".to_string()
            }
        }
    }

    async fn edit(&mut self, update: ProfileUpdate) -> String {
        let client = self.session.client();
        let Some(dash) = self.dashboard.as_mut() else { return "sign in first\n".to_string(); };
        let identity = dash.board.identity().clone();
        match ProfileAccess::new(client).update_profile(&identity, update).await {
            Ok(p) => {
                let out = render::render_profile(&p);
                dash.profile = Some(p);
                out
            }
            Err(e) => describe(&e),
        }
    }

    async fn register(&mut self, n: usize) -> String {
        let Some(dash) = self.dashboard.as_mut() else { return "sign in first\n".to_string(); };
        let Some(event) = n.checked_sub(1).and_then(|i| dash.board.events().get(i)) else {
            return format!("no event number {}; run `events` to list them\n", n);
        };
        let (event_id, title): (Uuid, String) = (event.id, event.title.clone());
        match dash.board.register(event_id).await {
            Ok(RegisterOutcome::Registered(_)) => format!("registered for {}\n", title),
            Ok(RegisterOutcome::AlreadyRegistered) => format!("already registered for {}\n", title),
            Err(e) => describe(&e),
        }
    }
}
