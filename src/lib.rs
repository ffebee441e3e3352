pub mod auth;
pub mod cli;
pub mod models;
pub mod store;
pub mod sync;
pub mod view;

use auth::{ AuthProvider, FileAuthProvider, StaticAuthProvider };
use cli::Args;
use log::{ debug, error, info, warn };
use std::error::Error;
use std::future::Future;
use std::io;
use std::sync::Arc;
use store::HttpMessageStore;
use sync::{ MessageSync, SendOutcome };
use tokio::io::{ AsyncBufRead, AsyncBufReadExt, BufReader };
use view::TerminalView;

pub fn build_auth_provider(args: &Args) -> Arc<dyn AuthProvider> {
    match &args.credentials {
        Some(path) => {
            info!("Reading credentials from: {}", path);
            Arc::new(FileAuthProvider::new(path))
        }
        None => {
            let provider = StaticAuthProvider::new(args.access_token.clone(), args.username.clone());
            if !provider.current().map_or(false, |s| s.can_send()) {
                warn!("No signed-in user configured. Messages can be read but not sent.");
            }
            Arc::new(provider)
        }
    }
}

/// Sends each input line until `shutdown` resolves. Shutdown also interrupts a
/// send that is still waiting on the server. Closed input keeps the session
/// following the conversation.
pub async fn follow_input<R, S>(sync: &MessageSync, auth: &dyn AuthProvider, input: R, shutdown: S)
    where R: AsyncBufRead + Unpin, S: Future
{
    let mut lines = input.lines();
    let mut input_open = true;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line {
                    Ok(Some(text)) => {
                        tokio::select! {
                            result = sync.send(&text, auth) => match result {
                                Ok(SendOutcome::Sent(message)) => debug!("Sent message {}", message.id),
                                Ok(SendOutcome::Skipped) => {}
                                Err(e) => warn!("Message not sent: {}", e),
                            },
                            _ = &mut shutdown => {
                                info!("Shutting down with a send still in flight");
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Input closed; still following the conversation. Press Ctrl-C to quit.");
                        input_open = false;
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        warn!("Skipping unreadable input line: {}", e);
                    }
                    Err(e) => {
                        error!("Stopped reading input: {}", e);
                        input_open = false;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = args.sync_config();

    info!("--- Chat Configuration ---");
    info!("API Base URL: {}", args.base_url);
    info!("Event ID: {}", args.event_id);
    info!("Poll Interval: {:?}", config.poll_interval);
    info!("Error Clear Delay: {:?}", config.error_clear_after);
    info!("Refresh Ordering: {:?}", config.ordering);
    info!("-------------------------");

    let store = Arc::new(HttpMessageStore::new(&args.base_url)?);
    let auth = build_auth_provider(&args);
    let sync = MessageSync::new(store, config);

    let mut updates = sync.subscribe();
    sync.start(args.event_id.clone(), auth.clone());

    let renderer = tokio::spawn(async move {
        let mut terminal = TerminalView::new();
        loop {
            let view = updates.borrow_and_update().clone();
            if let Err(e) = terminal.print(&view) {
                error!("Failed to write to stdout: {}", e);
                break;
            }
            if updates.changed().await.is_err() {
                break;
            }
        }
    });

    let input = BufReader::new(tokio::io::stdin());
    follow_input(&sync, auth.as_ref(), input, tokio::signal::ctrl_c()).await;

    renderer.abort();
    sync.stop();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::models::Message;
    use crate::store::{ MessageStore, StoreError };
    use crate::sync::SyncConfig;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Lists nothing; creates either hang forever or record the content.
    #[derive(Default)]
    struct InputStore {
        hang: bool,
        posted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageStore for InputStore {
        async fn list_messages(
            &self,
            _conversation_id: &str,
            _token: Option<&str>
        ) -> Result<Vec<Message>, StoreError> {
            Ok(Vec::new())
        }

        async fn create_message(
            &self,
            _conversation_id: &str,
            _token: &str,
            content: &str
        ) -> Result<Message, StoreError> {
            self.posted.lock().unwrap().push(content.to_string());
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(StoreError::Status { status: 500, message: None })
        }
    }

    fn started(store: Arc<InputStore>) -> (MessageSync, StaticAuthProvider) {
        let config = SyncConfig { poll_interval: Duration::from_secs(3600), ..SyncConfig::default() };
        let sync = MessageSync::new(store, config);
        let auth = StaticAuthProvider::new(Some("tok".into()), Some("maria".into()));
        sync.start("42", Arc::new(auth.clone()));
        (sync, auth)
    }

    async fn wait_for_posts(store: &InputStore, count: usize) {
        for _ in 0..200 {
            if store.posted.lock().unwrap().len() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} posts", count);
    }

    #[tokio::test]
    async fn shutdown_interrupts_hung_send() {
        let store = Arc::new(InputStore { hang: true, ..InputStore::default() });
        let (sync, auth) = started(store.clone());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let follow = follow_input(&sync, &auth, &b"hello\n"[..], stop_rx);
        let trigger = async {
            wait_for_posts(&store, 1).await;
            stop_tx.send(()).unwrap();
        };

        tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(follow, trigger) })
            .await
            .expect("shutdown should not wait for the hung send");
        assert!(!sync.view().sending);
        sync.stop();
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_skipped() {
        let store = Arc::new(InputStore::default());
        let (sync, auth) = started(store.clone());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let follow = follow_input(&sync, &auth, &b"\xff\xfe\nstill here\n"[..], stop_rx);
        let trigger = async {
            wait_for_posts(&store, 1).await;
            stop_tx.send(()).unwrap();
        };

        tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(follow, trigger) })
            .await
            .unwrap();
        assert_eq!(*store.posted.lock().unwrap(), vec!["still here".to_string()]);
        sync.stop();
    }
}
