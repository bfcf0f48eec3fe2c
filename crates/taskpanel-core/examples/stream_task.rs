use taskpanel_core::observability::init_observability;
use taskpanel_core::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), PanelError> {
    taskpanel_core::config::load_env();
    init_observability();

    let config = PanelConfig::from_env()?;
    let credentials = CredentialStore::load(FileKvStorage::new(config.storage_path.clone()))?;
    let runner = StreamRunner::http(config)?;
    let (callbacks, mut messages) = ChannelCallbacks::new();

    let task = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Open example.com and report the page title".to_string());
    let _handle = runner.start(&task, credentials.sanitized(), callbacks);

    while let Some(message) = messages.recv().await {
        match message {
            RunMessage::Event(event) => println!("[{}] {}", event.kind, event.data),
            RunMessage::Error(failure) => eprintln!("run error: {failure}"),
            RunMessage::Done(completion) => {
                println!("done: {completion:?}");
                break;
            }
        }
    }
    Ok(())
}
