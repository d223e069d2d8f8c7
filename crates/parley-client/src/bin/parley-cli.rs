//! Terminal front end: reads commands from stdin and prints socket events
//! as they arrive.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin, stdin};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use parley_client::{ApiClient, AuthStore, ChatStore, Credentials};
use parley_types::api::{LoginRequest, SendMessageRequest, SignupRequest, UpdateProfileRequest};
use parley_types::events::ServerEvent;
use parley_types::models::Message;

type Input = Lines<BufReader<Stdin>>;

enum Flow {
    Continue,
    Quit,
}

const HELP: &str = "\
commands:
  signup | login            authenticate (prompts for details)
  users                     list contacts
  open <n>                  open the thread with contact n
  say <text>                send text to the open thread
  image <path>              send an image to the open thread
  profile                   show your profile
  profile name|bio <value>  edit your profile
  profile avatar <path>     upload a new avatar
  media                     images shared in the open thread
  logout | quit | help";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "parley_client=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let server = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PARLEY_SERVER_URL").ok())
        .unwrap_or_else(|| "http://localhost:5001".into());

    let mut auth = AuthStore::new(ApiClient::new(&server));
    let mut chat = ChatStore::new();
    let mut input = BufReader::new(stdin()).lines();

    if let Ok(token) = std::env::var("PARLEY_TOKEN") {
        match auth.check(token).await {
            Ok(user) => println!("Welcome back, {}", user.full_name),
            Err(e) => println!("[!] Stored session rejected: {}", e),
        }
    }

    println!("Connected to {}. Type `help` for commands.", server);
    loop {
        prompt();
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                match run_command(line.trim(), &mut auth, &mut chat, &mut input).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => println!("[!] {}", e),
                }
            }
            event = auth.next_event() => match event {
                Some(event) => {
                    println!();
                    on_event(event, &mut auth, &mut chat).await;
                }
                None => println!("\n[!] Live connection lost"),
            },
        }
    }

    Ok(())
}

async fn run_command(
    line: &str,
    auth: &mut AuthStore,
    chat: &mut ChatStore,
    input: &mut Input,
) -> Result<Flow> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match cmd {
        "" => {}
        "help" => println!("{}", HELP),
        "quit" | "exit" => return Ok(Flow::Quit),

        "signup" => {
            let req = SignupRequest {
                full_name: Some(ask(input, "full name").await?),
                email: Some(ask(input, "email").await?),
                password: Some(ask(input, "password").await?),
                bio: Some(ask(input, "bio").await?),
            };
            println!("{}", auth.login(Credentials::Signup(req)).await?);
            show_token(auth);
        }
        "login" => {
            let req = LoginRequest {
                email: Some(ask(input, "email").await?),
                password: Some(ask(input, "password").await?),
            };
            println!("{}", auth.login(Credentials::Login(req)).await?);
            show_token(auth);
        }
        "logout" => {
            auth.logout().await;
            *chat = ChatStore::new();
            println!("Logged out");
        }

        "users" => {
            chat.get_users(auth).await?;
            print_contacts(auth, chat);
        }
        "open" => {
            let n: usize = rest.parse().context("usage: open <n>")?;
            let Some(user) = n.checked_sub(1).and_then(|i| chat.users().get(i)).cloned() else {
                bail!("no contact #{} (run `users` first)", n);
            };
            let id = user.id;
            chat.select_user(Some(user));
            chat.get_messages(auth, id).await?;
            print_thread(auth, chat);
        }
        "say" => {
            if rest.is_empty() {
                bail!("usage: say <text>");
            }
            let body = SendMessageRequest {
                text: Some(rest.to_string()),
                image: None,
            };
            let sent = chat.send_message(auth, body).await?;
            println!("{}", render(&sent, "you"));
        }
        "image" => {
            let body = SendMessageRequest {
                text: None,
                image: Some(data_uri(rest).await?),
            };
            let sent = chat.send_message(auth, body).await?;
            println!("{}", render(&sent, "you"));
        }
        "media" => {
            let media = chat.media();
            if media.is_empty() {
                println!("No media in this thread");
            }
            for url in media {
                println!("  {}", url);
            }
        }

        "profile" => {
            let (field, value) = rest.split_once(' ').unwrap_or((rest, ""));
            let value = value.trim().to_string();
            let req = match field {
                "" => {
                    let user = auth.user().context("not logged in")?;
                    println!("{} <{}>", user.full_name, user.email);
                    println!("  bio:    {}", user.bio);
                    if !user.profile_pic.is_empty() {
                        println!("  avatar: {}", user.profile_pic);
                    }
                    return Ok(Flow::Continue);
                }
                "name" => UpdateProfileRequest {
                    full_name: Some(value),
                    ..Default::default()
                },
                "bio" => UpdateProfileRequest {
                    bio: Some(value),
                    ..Default::default()
                },
                "avatar" => UpdateProfileRequest {
                    profile_pic: Some(data_uri(&value).await?),
                    ..Default::default()
                },
                other => bail!("unknown profile field `{}`", other),
            };
            println!("{}", auth.update_profile(&req).await?);
        }

        other => println!("Unknown command `{}`. Type `help`.", other),
    }

    Ok(Flow::Continue)
}

async fn on_event(event: ServerEvent, auth: &mut AuthStore, chat: &mut ChatStore) {
    auth.apply_event(&event);
    let Some(me) = auth.user().map(|u| u.id) else {
        return;
    };

    match (&event, chat.apply_event(&event, me)) {
        (ServerEvent::GetOnlineUsers(users), _) => {
            println!("* {} user(s) online", users.len());
        }
        (ServerEvent::NewMessage(message), Some(id)) => {
            let name = chat
                .selected_user()
                .map(|u| u.full_name.clone())
                .unwrap_or_default();
            println!("{}", render(message, &name));
            if let Err(e) = chat.mark_seen(auth, id).await {
                warn!("Could not mark {} as seen: {}", id, e);
            }
        }
        (ServerEvent::NewMessage(message), None) => {
            let name = chat
                .users()
                .iter()
                .find(|u| u.id == message.sender_id)
                .map(|u| u.full_name.as_str())
                .unwrap_or("someone");
            println!(
                "* new message from {} ({} unseen)",
                name,
                chat.unseen_from(message.sender_id)
            );
        }
    }
}

fn print_contacts(auth: &AuthStore, chat: &ChatStore) {
    if chat.users().is_empty() {
        println!("No other users yet");
    }
    for (i, user) in chat.users().iter().enumerate() {
        let status = if auth.is_online(user.id) { "online" } else { "offline" };
        let unseen = match chat.unseen_from(user.id) {
            0 => String::new(),
            n => format!(" [{} new]", n),
        };
        println!("{:>3}. {} ({}){}", i + 1, user.full_name, status, unseen);
    }
}

fn print_thread(auth: &AuthStore, chat: &ChatStore) {
    let me = auth.user().map(|u| u.id);
    let them = chat
        .selected_user()
        .map(|u| u.full_name.as_str())
        .unwrap_or_default();
    println!("--- {} ---", them);
    for message in chat.messages() {
        let who = if Some(message.sender_id) == me { "you" } else { them };
        println!("{}", render(message, who));
    }
}

fn render(message: &Message, who: &str) -> String {
    let mut line = format!("[{}] {}:", message.created_at.format("%H:%M"), who);
    if let Some(text) = &message.text {
        line.push(' ');
        line.push_str(text);
    }
    if let Some(image) = &message.image {
        line.push_str(&format!(" <image {}>", image));
    }
    line
}

fn show_token(auth: &AuthStore) {
    if let Some(token) = auth.token() {
        println!("Set PARLEY_TOKEN={} to resume this session", token);
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn ask(input: &mut Input, label: &str) -> Result<String> {
    print!("  {}: ", label);
    let _ = std::io::stdout().flush();
    let line = input.next_line().await?.context("input closed")?;
    Ok(line.trim().to_string())
}

/// Read an image file into a base64 data URI.
async fn data_uri(path: &str) -> Result<String> {
    if path.is_empty() {
        bail!("missing image path");
    }
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => bail!("unsupported image type `{}`", ext),
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path))?;
    Ok(format!("data:{};base64,{}", mime, B64.encode(bytes)))
}
