//! JSON-RPC chain reader
//!
//! Talks to an Ethereum-compatible node over HTTP or WebSocket. Blocks are
//! fetched with full transactions via `eth_getBlockByNumber`; the last fetched
//! range is memoized because a window scan asks for the same range twice
//! (once for transactions, once for miners).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::chain::{ChainError, ChainReader};
use crate::config::Config;
use crate::types::{ChainBlock, ChainTransaction};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    timestamp: String,
    #[serde(default)]
    difficulty: Option<String>,
    gas_used: String,
    gas_limit: String,
    miner: String,
    #[serde(default)]
    uncles: Vec<String>,
    #[serde(default)]
    transactions: Vec<RpcTxEntry>,
}

/// Full transaction object, or just its hash when the block was requested
/// without transaction bodies
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcTxEntry {
    Full(RpcTransaction),
    Hash(#[allow(dead_code)] String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    from: String,
    to: Option<String>,
}

fn parse_quantity(hex: &str) -> Result<u64, ChainError> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Decode(format!("bad quantity {hex:?}: {e}")))
}

fn parse_u256(hex: &str) -> Result<U256, ChainError> {
    hex.parse::<U256>()
        .map_err(|e| ChainError::Decode(format!("bad integer {hex:?}: {e}")))
}

fn parse_address(hex: &str) -> Result<Address, ChainError> {
    hex.parse::<Address>()
        .map_err(|e| ChainError::Decode(format!("bad address {hex:?}: {e}")))
}

fn format_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

impl RpcBlock {
    fn to_chain_block(&self) -> Result<ChainBlock, ChainError> {
        Ok(ChainBlock {
            number: parse_quantity(&self.number)?,
            timestamp: parse_quantity(&self.timestamp)?,
            difficulty: match &self.difficulty {
                Some(d) => parse_u256(d)?,
                None => U256::ZERO,
            },
            gas_used: parse_quantity(&self.gas_used)?,
            gas_limit: parse_quantity(&self.gas_limit)?,
            miner: parse_address(&self.miner)?,
            uncle_count: self.uncles.len() as u64,
            tx_count: self.transactions.len() as u64,
        })
    }

    fn chain_transactions(&self) -> Result<Vec<ChainTransaction>, ChainError> {
        let block_number = parse_quantity(&self.number)?;
        self.transactions
            .iter()
            .filter_map(|entry| match entry {
                RpcTxEntry::Full(tx) => Some(tx),
                RpcTxEntry::Hash(_) => None,
            })
            .map(|tx| {
                Ok(ChainTransaction {
                    from: parse_address(&tx.from)?,
                    to: tx.to.as_deref().map(parse_address).transpose()?,
                    block_number,
                })
            })
            .collect()
    }
}

/// Every height in a range must be present. A gap fails the whole range so
/// the caller retries it instead of recording a partial window.
fn complete_range(from: u64, fetched: Vec<Option<RpcBlock>>) -> Result<Vec<RpcBlock>, ChainError> {
    fetched
        .into_iter()
        .zip(from..)
        .map(|(block, number)| {
            block.ok_or_else(|| {
                warn!(block = number, "Block not found");
                ChainError::MissingBlock(number)
            })
        })
        .collect()
}

enum Transport {
    Http {
        url: String,
        client: reqwest::Client,
    },
    Ws {
        url: String,
        stream: tokio::sync::Mutex<Option<WsStream>>,
    },
}

/// [`ChainReader`] backed by a node's JSON-RPC interface
pub struct RpcChainReader {
    transport: Transport,
    timeout: Duration,
    next_id: AtomicU64,
    last_range: Mutex<Option<(u64, u64, Arc<Vec<RpcBlock>>)>>,
}

impl RpcChainReader {
    pub fn http(url: &str, timeout: Duration) -> Self {
        Self::with_transport(
            Transport::Http {
                url: url.to_string(),
                client: reqwest::Client::new(),
            },
            timeout,
        )
    }

    /// The connection is opened lazily and re-opened after any socket error.
    pub fn websocket(url: &str, timeout: Duration) -> Self {
        Self::with_transport(
            Transport::Ws {
                url: url.to_string(),
                stream: tokio::sync::Mutex::new(None),
            },
            timeout,
        )
    }

    pub fn from_config(config: &Config) -> Self {
        if config.use_websocket {
            Self::websocket(&config.ws_url(), config.rpc_timeout())
        } else {
            Self::http(&config.rpc_url(), config.rpc_timeout())
        }
    }

    fn with_transport(transport: Transport, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            next_id: AtomicU64::new(1),
            last_range: Mutex::new(None),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });

        let resp = tokio::time::timeout(self.timeout, self.send(id, &body))
            .await
            .map_err(|_| ChainError::Timeout(self.timeout))??;

        if let Some(error) = resp.get("error") {
            return Err(ChainError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        let result = resp
            .get("result")
            .ok_or_else(|| ChainError::Decode(format!("no result in response to {method}")))?;

        serde_json::from_value(result.clone())
            .map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }

    async fn send(&self, id: u64, body: &Value) -> Result<Value, ChainError> {
        match &self.transport {
            Transport::Http { url, client } => {
                let resp = client
                    .post(url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| ChainError::Transport(e.to_string()))?;
                resp.json::<Value>()
                    .await
                    .map_err(|e| ChainError::Decode(e.to_string()))
            }
            Transport::Ws { url, stream } => {
                let mut guard = stream.lock().await;
                if guard.is_none() {
                    debug!("Connecting to {}", url);
                    let (ws, _) = connect_async(url.as_str())
                        .await
                        .map_err(|e| ChainError::Transport(e.to_string()))?;
                    *guard = Some(ws);
                }

                let result = match guard.as_mut() {
                    Some(ws) => ws_roundtrip(ws, id, body).await,
                    None => Err(ChainError::Transport("websocket not connected".to_string())),
                };
                if result.is_err() {
                    *guard = None;
                }
                result
            }
        }
    }

    async fn fetch_range(&self, from: u64, to: u64) -> Result<Arc<Vec<RpcBlock>>, ChainError> {
        if let Some((cached_from, cached_to, blocks)) = self.last_range.lock().as_ref() {
            if *cached_from == from && *cached_to == to {
                return Ok(Arc::clone(blocks));
            }
        }

        let mut fetched = Vec::with_capacity(to.saturating_sub(from) as usize);
        for number in from..to {
            let block: Option<RpcBlock> = self
                .call(
                    "eth_getBlockByNumber",
                    serde_json::json!([format_quantity(number), true]),
                )
                .await?;
            fetched.push(block);
        }

        let blocks = Arc::new(complete_range(from, fetched)?);
        *self.last_range.lock() = Some((from, to, Arc::clone(&blocks)));
        Ok(blocks)
    }
}

async fn ws_roundtrip(ws: &mut WsStream, id: u64, body: &Value) -> Result<Value, ChainError> {
    ws.send(Message::Text(body.to_string().into()))
        .await
        .map_err(|e| ChainError::Transport(e.to_string()))?;

    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let value: Value = serde_json::from_str(&text)
                    .map_err(|e| ChainError::Decode(e.to_string()))?;
                // Responses to requests abandoned after a timeout can still arrive
                if value.get("id").and_then(Value::as_u64) == Some(id) {
                    return Ok(value);
                }
                debug!("Skipping unrelated message: {}", text);
            }
            Ok(Message::Ping(data)) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                return Err(ChainError::Transport("websocket closed".to_string()));
            }
            Err(e) => return Err(ChainError::Transport(e.to_string())),
            _ => {}
        }
    }

    Err(ChainError::Transport("websocket stream ended".to_string()))
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn chain_head(&self) -> Result<u64, ChainError> {
        let hex: String = self.call("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity(&hex)
    }

    async fn blocks_in_range(&self, from: u64, to: u64) -> Result<Vec<ChainBlock>, ChainError> {
        if from >= to {
            return Ok(Vec::new());
        }
        self.fetch_range(from, to)
            .await?
            .iter()
            .map(RpcBlock::to_chain_block)
            .collect()
    }

    async fn transactions_in_range(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainTransaction>, ChainError> {
        if from >= to {
            return Ok(Vec::new());
        }
        let blocks = self.fetch_range(from, to).await?;
        let mut txs = Vec::new();
        for block in blocks.iter() {
            txs.extend(block.chain_transactions()?);
        }
        Ok(txs)
    }

    async fn balance(&self, address: Address, block: u64) -> Result<U256, ChainError> {
        let hex: String = self
            .call(
                "eth_getBalance",
                serde_json::json!([address, format_quantity(block)]),
            )
            .await?;
        parse_u256(&hex)
    }

    async fn code(&self, address: Address, block: u64) -> Result<Bytes, ChainError> {
        let hex: String = self
            .call(
                "eth_getCode",
                serde_json::json!([address, format_quantity(block)]),
            )
            .await?;
        let code = hex::decode(hex.trim_start_matches("0x"))
            .map_err(|e| ChainError::Decode(format!("bad bytecode: {e}")))?;
        Ok(code.into())
    }

    async fn block(&self, number: u64) -> Result<Option<ChainBlock>, ChainError> {
        let block: Option<RpcBlock> = self
            .call(
                "eth_getBlockByNumber",
                serde_json::json!([format_quantity(number), false]),
            )
            .await?;
        block.map(|b| b.to_chain_block()).transpose()
    }

    async fn client_version(&self) -> Result<String, ChainError> {
        self.call("web3_clientVersion", serde_json::json!([])).await
    }
}
