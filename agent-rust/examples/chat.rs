use dealdesk_agent::{AppConfig, ConversationEngine, MediaKind, Message};
use dotenvy::dotenv;
use futures::StreamExt;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    let engine = ConversationEngine::from_config(&config);

    // Status lines go to stderr so they do not interleave with the reply.
    let mut status = engine.status_sink().subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let update = status.borrow_and_update().clone();
            if let Some(update) = update {
                eprintln!("[{:?}] {update}", update.level);
            }
        }
    });

    let mut history = vec![Message::system(
        "You are a research assistant specialised in M&A.",
    )];

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                engine.reset().await;
                history.truncate(1);
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        history.push(Message::user(line));

        let mut reply = String::new();
        let mut stream = engine.send_message(&history);
        while let Some(chunk) = stream.next().await {
            print!("{chunk}");
            io::stdout().flush()?;
            reply.push_str(&chunk);
        }
        println!();

        let message_id = engine.latest_message_id().await?;
        let mut assistant = Message::assistant(reply);
        if let Some(message_id) = message_id {
            for artifact in engine.registry().artifacts(&message_id) {
                println!(
                    "  attached: {} ({}, {} bytes)",
                    artifact.filename,
                    artifact.download_mime(),
                    artifact.bytes.len()
                );
                if artifact.media_kind == MediaKind::Csv {
                    if let Some(preview) = artifact.as_text() {
                        for row in preview.lines().take(5) {
                            println!("    {row}");
                        }
                    }
                }
            }
            assistant = assistant.with_message_id(message_id);
        }
        history.push(assistant);
    }

    Ok(())
}
