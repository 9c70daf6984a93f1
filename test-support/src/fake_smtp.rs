use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};
use tokio::{sync::watch, time::timeout};

const SERVER_NAME: &str = "relay.test";

/// A message as the relay received it: envelope plus the raw DATA section.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedMail {
    pub from: String,
    pub recipients: Vec<String>,
    pub content: String,
}

#[derive(Clone)]
struct RecordingHandler {
    envelope: Option<(String, Vec<String>)>,
    data: Vec<u8>,
    inbox: Arc<Inbox>,
}

struct Inbox {
    mails: Mutex<Vec<ReceivedMail>>,
    delivered: watch::Sender<usize>,
}

impl Handler for RecordingHandler {
    fn data_start(
        &mut self,
        _domain: &str,
        from: &str,
        _is8bit: bool,
        to: &[String],
    ) -> mailin_embedded::Response {
        self.envelope = Some((from.into(), to.to_vec()));
        mailin_embedded::response::OK
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        debug!("Got data:\n{}", String::from_utf8_lossy(buf));
        self.data.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let (from, recipients) = self.envelope.take().unwrap_or_default();
        let content = String::from_utf8_lossy(&std::mem::take(&mut self.data)).into_owned();
        let mut mails = self.inbox.mails.lock().unwrap();
        mails.push(ReceivedMail {
            from,
            recipients,
            content,
        });
        self.inbox.delivered.send_replace(mails.len());
        mailin_embedded::response::OK
    }
}

/// An SMTP relay on an ephemeral local port which accepts and records every message.
pub struct FakeSmtpServer {
    address: SocketAddr,
    inbox: Arc<Inbox>,
    seen: Mutex<usize>,
}

impl FakeSmtpServer {
    pub fn start() -> Self {
        let (delivered, _) = watch::channel(0);
        let inbox = Arc::new(Inbox {
            mails: Mutex::new(Vec::new()),
            delivered,
        });
        let handler = RecordingHandler {
            envelope: None,
            data: Vec::new(),
            inbox: inbox.clone(),
        };
        let address = serve(handler);
        Self {
            address,
            inbox,
            seen: Mutex::new(0),
        }
    }

    /// Connection URL for lettre, without TLS.
    pub fn url(&self) -> String {
        format!("smtp://{}", self.address)
    }

    /// Waits up to `wait` for a message which has not been returned by this method before.
    pub async fn next_mail(&self, wait: Duration) -> Option<ReceivedMail> {
        let seen = *self.seen.lock().unwrap();
        let mut receiver = self.inbox.delivered.subscribe();
        timeout(wait, receiver.wait_for(|delivered| *delivered > seen))
            .await
            .ok()?
            .ok()?;
        let mails = self.inbox.mails.lock().unwrap();
        *self.seen.lock().unwrap() = seen + 1;
        mails.get(seen).cloned()
    }

    pub fn received_count(&self) -> usize {
        self.inbox.mails.lock().unwrap().len()
    }
}

#[derive(Clone)]
struct PoisonedSmtpHandler;

impl Handler for PoisonedSmtpHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts a relay which fails every transaction and returns its connection URL.
pub fn start_poisoned_smtp_server() -> String {
    format!("smtp://{}", serve(PoisonedSmtpHandler))
}

fn serve<H: Handler + Clone + Send + 'static>(handler: H) -> SocketAddr {
    let address = free_local_address();
    let mut server = Server::new(handler);
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(address)
        .unwrap();
    thread::spawn(move || {
        let _ = server.serve();
    });
    wait_until_listening(address);
    address
}

fn free_local_address() -> SocketAddr {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap()
}

fn wait_until_listening(address: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(address).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("Fake SMTP server did not start listening on {address}");
}
