//! HTTP transport. A seek is a `POST /deliver` carrying the signed envelope;
//! the orderer answers with newline-delimited JSON `DeliverResponse`s.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use ordlink_core::{serialize, DeliverResponse, SeekEnvelope, CLIENT_CERT_HEADER};
use parking_lot::Mutex;
use reqwest::header::HeaderValue;
use reqwest::{Certificate, Client};

use crate::endpoint::Endpoint;
use crate::error::DeliverError;
use crate::ports::{DeliverStream, Dialer, OrdererConnection};

/// Dials orderers over HTTP, trusting each endpoint's root certificates.
///
/// One `reqwest::Client` is kept per distinct root certificate set, so
/// reconnects reuse its connection pool.
pub struct HttpDialer {
    conn_timeout: Duration,
    client_cert: Option<HeaderValue>,
    clients: Mutex<HashMap<Vec<String>, Client>>,
}

impl HttpDialer {
    pub fn new(conn_timeout: Duration) -> Self {
        HttpDialer {
            conn_timeout,
            client_cert: None,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Present `cert_pem` on every seek, matching the binding hash the
    /// seek requests carry
    pub fn with_client_cert(mut self, cert_pem: Option<&str>) -> Self {
        self.client_cert = cert_pem
            .map(|pem| HeaderValue::from_str(&hex::encode(pem.as_bytes())))
            .and_then(Result::ok);
        self
    }

    fn client_for(&self, endpoint: &Endpoint) -> Result<Client, DeliverError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&endpoint.root_certs) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().connect_timeout(self.conn_timeout);
        for pem in &endpoint.root_certs {
            let cert = Certificate::from_pem(pem.as_bytes()).map_err(|e| {
                DeliverError::InvalidEndpoint {
                    address: endpoint.address.clone(),
                    reason: format!("bad root certificate: {}", e),
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder.build().map_err(|e| DeliverError::Dial {
            address: endpoint.address.clone(),
            reason: e.to_string(),
        })?;
        clients.insert(endpoint.root_certs.clone(), client.clone());
        Ok(client)
    }

    pub fn cached_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Turn `host:port` into a base URL; explicit schemes are kept
fn base_url(endpoint: &Endpoint) -> Result<String, DeliverError> {
    let address = endpoint.address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(DeliverError::InvalidEndpoint {
            address: endpoint.address.clone(),
            reason: "empty address".to_string(),
        });
    }

    if address.starts_with("http://") || address.starts_with("https://") {
        Ok(address.to_string())
    } else if endpoint.root_certs.is_empty() {
        Ok(format!("http://{}", address))
    } else {
        Ok(format!("https://{}", address))
    }
}

#[async_trait]
impl Dialer for HttpDialer {
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn OrdererConnection>, DeliverError> {
        let base = base_url(endpoint)?;
        let client = self.client_for(endpoint)?;

        Ok(Box::new(HttpConnection {
            client,
            base,
            client_cert: self.client_cert.clone(),
        }))
    }
}

struct HttpConnection {
    client: Client,
    base: String,
    client_cert: Option<HeaderValue>,
}

#[async_trait]
impl OrdererConnection for HttpConnection {
    async fn deliver(&self, envelope: SeekEnvelope) -> Result<DeliverStream, DeliverError> {
        let url = format!("{}/deliver", self.base);
        let mut request = self.client.post(&url).json(&envelope);
        if let Some(cert) = &self.client_cert {
            request = request.header(CLIENT_CERT_HEADER, cert.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliverError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliverError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        Ok(ndjson_stream(response.bytes_stream()))
    }
}

/// Split a byte stream into JSON lines and decode each as a `DeliverResponse`.
/// The stream ends after the first error.
pub(crate) fn ndjson_stream<S, B, E>(body: S) -> DeliverStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let init = (Box::pin(body), Vec::<u8>::new(), false);

    stream::unfold(init, |(mut body, mut buf, done)| async move {
        if done {
            return None;
        }
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if is_blank(&line) {
                    continue;
                }
                let item = decode(&line[..pos]);
                let failed = item.is_err();
                return Some((item, (body, buf, failed)));
            }

            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    let err = DeliverError::Transport(e.to_string());
                    return Some((Err(err), (body, buf, true)));
                }
                None if is_blank(&buf) => return None,
                None => {
                    let item = decode(&buf);
                    buf.clear();
                    return Some((item, (body, buf, true)));
                }
            }
        }
    })
    .boxed()
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}

fn decode(line: &[u8]) -> Result<DeliverResponse, DeliverError> {
    Ok(serialize::from_json_bytes(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordlink_core::{Block, BlockData, DeliverStatus};

    fn chunks(parts: Vec<&[u8]>) -> DeliverStream {
        let owned: Vec<_> = parts.into_iter().map(|p| Ok::<_, std::io::Error>(p.to_vec())).collect();
        ndjson_stream(stream::iter(owned))
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url(&Endpoint::new("orderer0:7050")).unwrap(), "http://orderer0:7050");
        assert_eq!(
            base_url(&Endpoint::with_root_certs("orderer0:7050", vec!["pem".to_string()])).unwrap(),
            "https://orderer0:7050"
        );
        assert_eq!(base_url(&Endpoint::new("http://127.0.0.1:9/")).unwrap(), "http://127.0.0.1:9");
        assert!(base_url(&Endpoint::new("  ")).is_err());
    }

    #[tokio::test]
    async fn test_clients_are_reused_per_root_set() {
        let dialer = HttpDialer::new(Duration::from_millis(100));
        dialer.dial(&Endpoint::new("orderer0:7050")).await.unwrap();
        dialer.dial(&Endpoint::new("orderer1:7050")).await.unwrap();
        dialer.dial(&Endpoint::new("orderer0:7050")).await.unwrap();
        assert_eq!(dialer.cached_clients(), 1);
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let genesis = Block::build(None, BlockData::default()).unwrap();
        let mut line = serialize::to_json_line(&DeliverResponse::Block(genesis.clone())).unwrap();
        line.extend(serialize::to_json_line(&DeliverResponse::Status(DeliverStatus::Success)).unwrap());
        let (head, tail) = line.split_at(17);

        let messages: Vec<_> = chunks(vec![head, &b""[..], tail]).collect().await;
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            Ok(DeliverResponse::Block(block)) => assert_eq!(block.number(), 0),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(messages[1], Ok(DeliverResponse::Status(DeliverStatus::Success))));
    }

    #[tokio::test]
    async fn test_garbage_ends_stream() {
        let messages: Vec<_> = chunks(vec![&b"\n{not json}\n{\"type\":\"Status\",\"data\":\"Success\"}\n"[..]])
            .collect()
            .await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], Err(DeliverError::Core(_))));
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let messages: Vec<_> = chunks(vec![&b"{\"type\":\"Status\",\"data\":\"NotFound\"}"[..]])
            .collect()
            .await;
        assert!(matches!(
            messages.as_slice(),
            [Ok(DeliverResponse::Status(DeliverStatus::NotFound))]
        ));
    }
}
