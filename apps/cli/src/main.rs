use anyhow::Result;
use clap::Parser;
use shared::domain::{GroupId, UserId};
use sync_core::{load_settings, ChatClient, RestClient, Session, SyncEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }

    let rest = RestClient::new(settings.server_url.clone());
    let login = rest.login(&args.email, &args.password).await?;
    println!("Logged in as {} ({})", login.user.name, login.user.id);

    let session = Session::new(login.user.id.clone(), login.token);
    let client = ChatClient::new(session, settings);
    client.connect().await;

    let mut events = client.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!("Commands: /peer <user-id>, /group <group-id>, /who, /read, /quit.");
    println!("Anything else is sent as a message to the open conversation.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(peer) = line.strip_prefix("/peer ") {
            match client.open_direct(UserId::from(peer.trim())).await {
                Ok(()) => client.observe_visible().await,
                Err(err) => println!("! {err}"),
            }
        } else if let Some(group) = line.strip_prefix("/group ") {
            match client.open_group(GroupId::from(group.trim())).await {
                Ok(()) => client.observe_visible().await,
                Err(err) => println!("! {err}"),
            }
        } else if line == "/who" {
            let mut online: Vec<String> = client
                .online_users()
                .await
                .into_iter()
                .map(|user| user.to_string())
                .collect();
            online.sort();
            println!("online: {}", online.join(", "));
        } else if line == "/read" {
            client.observe_visible().await;
        } else if line == "/quit" {
            break;
        } else if let Err(err) = client.compose(line, None).await {
            println!("! {err}");
        }
    }

    client.disconnect().await;
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Connection(state) => println!("* connection: {state:?}"),
        SyncEvent::MessageAppended { message_id } => println!("* message {message_id}"),
        SyncEvent::MessageConfirmed { temp_id, message_id } => {
            println!("* confirmed {temp_id} -> {message_id}")
        }
        SyncEvent::StatusUpdated { message_id, status } => {
            println!("* status {message_id}: {status:?}")
        }
        SyncEvent::GroupReadUpdated { message_id } => println!("* read-by updated {message_id}"),
        SyncEvent::PresenceChanged => {}
        SyncEvent::SendRejected { error } => println!("! send rejected: {error}"),
        SyncEvent::ConversationLoaded { .. } => println!("* history loaded"),
        SyncEvent::Error(message) => println!("! {message}"),
    }
}
