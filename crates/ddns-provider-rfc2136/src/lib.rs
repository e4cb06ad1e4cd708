// # RFC2136 Dynamic Update Handler
//
// Keeps one A/AAAA record on an authoritative server in sync using DNS
// UPDATE messages, optionally signed with TSIG.
//
// ## Behavior
//
// - The handler only trusts records it wrote itself. `get` queries the
//   server and returns the answer whose data equals the last record this
//   process created or updated; without one it reports the record absent
// - `create` adds the record to the zone
// - `update` adds the new record and deletes the last written one by value
//   in a single message; it fails with a missing identifier error if nothing
//   was written yet
// - Update messages carry no prerequisites, so foreign records in the RRset
//   never block a write
// - Records carry TTL 120; every exchange is bounded by the DNS exchange
//   timeout and the caller's cancellation token
//
// hickory's synchronous client runs on the blocking pool.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ddns_core::address::AddressFamily;
use ddns_core::config::{RecordSpec, Rfc2136Config, TsigConfig};
use ddns_core::timeout::{DNS_EXCHANGE_TIMEOUT, bounded};
use ddns_core::traits::DnsUpdateHandler;
use ddns_core::{Error, Result};
use hickory_client::client::{Client, ClientConnection, SyncClient};
use hickory_client::error::{ClientError, ClientErrorKind};
use hickory_client::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode, UpdateMessage};
use hickory_client::rr::rdata::tsig::TsigAlgorithm;
use hickory_client::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_client::tcp::TcpClientConnection;
use hickory_client::udp::UdpClientConnection;
use hickory_proto::rr::dnssec::tsig::TSigner;
use hickory_proto::xfer::{DnsRequest, DnsRequestOptions, DnsResponse};
use std::net::{IpAddr, SocketAddr};
use tokio_util::sync::CancellationToken;

/// TTL for records written by this handler
pub const RFC2136_TTL: u32 = 120;

/// Allowed clock skew for TSIG signatures
const TSIG_FUDGE_SECS: u16 = 300;

/// Advertised EDNS payload size for update messages
const EDNS_PAYLOAD: u16 = 1232;

const PROVIDER: &str = "rfc2136";

#[derive(Clone)]
struct TsigKey {
    name: Name,
    key: Vec<u8>,
    algorithm: TsigAlgorithm,
}

impl TsigKey {
    fn from_config(config: &TsigConfig) -> Result<Self> {
        let algorithm = match config
            .algorithm
            .trim_end_matches('.')
            .to_ascii_lowercase()
            .as_str()
        {
            "hmac-md5" | "hmac-md5.sig-alg.reg.int" => TsigAlgorithm::HmacMd5,
            "hmac-sha1" => TsigAlgorithm::HmacSha1,
            "hmac-sha224" => TsigAlgorithm::HmacSha224,
            "hmac-sha256" => TsigAlgorithm::HmacSha256,
            "hmac-sha384" => TsigAlgorithm::HmacSha384,
            "hmac-sha512" => TsigAlgorithm::HmacSha512,
            other => {
                return Err(Error::config(format!(
                    "rfc2136: unsupported TSIG algorithm {}",
                    other
                )));
            }
        };

        let key = BASE64
            .decode(config.key.expose().trim())
            .map_err(|e| Error::config(format!("rfc2136: TSIG key is not valid base64: {}", e)))?;

        let name = Name::from_ascii(&config.key_name).map_err(|e| {
            Error::config(format!("rfc2136: invalid TSIG key name {}: {}", config.key_name, e))
        })?;

        let tsig = Self {
            name,
            key,
            algorithm,
        };
        tsig.signer()?;
        Ok(tsig)
    }

    fn signer(&self) -> Result<TSigner> {
        TSigner::new(
            self.key.clone(),
            self.algorithm.clone(),
            self.name.clone(),
            TSIG_FUDGE_SECS,
        )
        .map_err(|e| Error::config(format!("rfc2136: failed to create TSIG signer: {}", e)))
    }
}

enum Exchange {
    Query { name: Name, record_type: RecordType },
    Update { message: Message },
}

impl Exchange {
    /// Add `new` and, when given, delete `previous` by value
    ///
    /// No prerequisite section is written.
    fn update(zone: Name, new: Record, previous: Option<Record>) -> Self {
        let mut zone_section = Query::new();
        zone_section
            .set_name(zone)
            .set_query_class(DNSClass::IN)
            .set_query_type(RecordType::SOA);

        let mut message = Message::new();
        message
            .set_id(rand::random::<u16>())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Update)
            .set_recursion_desired(false);
        message.add_zone(zone_section);

        if let Some(mut previous) = previous {
            previous.set_dns_class(DNSClass::NONE);
            previous.set_ttl(0);
            message.add_update(previous);
        }
        message.add_update(new);

        let mut edns = Edns::new();
        edns.set_max_payload(EDNS_PAYLOAD);
        edns.set_version(0);
        message.set_edns(edns);

        Exchange::Update { message }
    }

    fn label(&self) -> &'static str {
        match self {
            Exchange::Query { .. } => "dns query",
            Exchange::Update { message } if message.updates().len() > 1 => "dns update (replace)",
            Exchange::Update { .. } => "dns update (add)",
        }
    }
}

#[derive(Clone)]
struct Transport {
    server: SocketAddr,
    use_tcp: bool,
    tsig: Option<TsigKey>,
}

impl Transport {
    /// Blocking; call from the blocking pool only
    fn send(&self, exchange: Exchange) -> Result<DnsResponse> {
        let connect_error = |e: ClientError| {
            Error::provider(PROVIDER, format!("failed to connect to {}: {}", self.server, e))
        };

        if self.use_tcp {
            let conn = TcpClientConnection::with_timeout(self.server, DNS_EXCHANGE_TIMEOUT)
                .map_err(connect_error)?;
            self.run(conn, exchange)
        } else {
            let conn = UdpClientConnection::with_timeout(self.server, DNS_EXCHANGE_TIMEOUT)
                .map_err(connect_error)?;
            self.run(conn, exchange)
        }
    }

    fn run<CC: ClientConnection>(&self, conn: CC, exchange: Exchange) -> Result<DnsResponse> {
        let client = match &self.tsig {
            Some(tsig) => SyncClient::with_tsigner(conn, tsig.signer()?),
            None => SyncClient::new(conn),
        };

        let label = exchange.label();
        let response = match exchange {
            Exchange::Query { name, record_type } => {
                client.query(&name, DNSClass::IN, record_type)
            }
            Exchange::Update { message } => client
                .send(DnsRequest::new(message, DnsRequestOptions::default()))
                .into_iter()
                .next()
                .unwrap_or_else(|| Err(ClientErrorKind::Message("no response received").into())),
        };

        response.map_err(|e| Error::provider(PROVIDER, format!("{} failed: {}", label, e)))
    }
}

fn check_response(response: &DnsResponse, label: &str) -> Result<()> {
    match response.response_code() {
        ResponseCode::NoError => Ok(()),
        code @ (ResponseCode::NotAuth | ResponseCode::Refused | ResponseCode::BADSIG) => {
            Err(Error::auth(format!("{}: server answered {}", label, code)))
        }
        code => Err(Error::provider(
            PROVIDER,
            format!("{}: server answered {}", label, code),
        )),
    }
}

fn address_of(record: &Record) -> Option<String> {
    match record.data()? {
        RData::A(a) => Some(a.0.to_string()),
        RData::AAAA(aaaa) => Some(aaaa.0.to_string()),
        _ => None,
    }
}

/// RFC2136 handler for one record
pub struct Rfc2136Handler {
    transport: Transport,
    zone: Name,
    fqdn: Name,
    record_type: RecordType,
    last_rr: Option<Record>,
}

impl std::fmt::Debug for Rfc2136Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rfc2136Handler")
            .field("server", &self.transport.server)
            .field("use_tcp", &self.transport.use_tcp)
            .field("tsig", &self.transport.tsig.as_ref().map(|_| "<REDACTED>"))
            .field("zone", &self.zone)
            .field("fqdn", &self.fqdn)
            .field("type", &self.record_type)
            .finish()
    }
}

impl Rfc2136Handler {
    /// Create a handler for `spec`
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: Bad server address, record name or TSIG settings
    pub fn new(spec: &RecordSpec, config: &Rfc2136Config) -> Result<Self> {
        if config.gss_tsig.is_some() {
            return Err(Error::config(
                "rfc2136: gssTsig authentication is not supported, use tsig",
            ));
        }

        let ip: IpAddr = config.address.trim().parse().map_err(|e| {
            Error::config(format!(
                "rfc2136: server address {} is not an IP address: {}",
                config.address, e
            ))
        })?;

        let tsig = config.tsig.as_ref().map(TsigKey::from_config).transpose()?;

        let zone = Name::from_ascii(format!("{}.", spec.domain))
            .map_err(|e| Error::config(format!("rfc2136: invalid zone {}: {}", spec.domain, e)))?;
        let fqdn = Name::from_ascii(format!("{}.", spec.fqdn()))
            .map_err(|e| Error::config(format!("rfc2136: invalid name {}: {}", spec.fqdn(), e)))?;

        let record_type = match spec.family {
            AddressFamily::V4 => RecordType::A,
            AddressFamily::V6 => RecordType::AAAA,
        };

        Ok(Self {
            transport: Transport {
                server: SocketAddr::new(ip, config.port),
                use_tcp: config.use_tcp,
                tsig,
            },
            zone,
            fqdn,
            record_type,
            last_rr: None,
        })
    }

    fn record(&self, address: &str) -> Result<Record> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| Error::invalid_address(format!("{} is not an IP address", address)))?;

        let rdata = match (self.record_type, ip) {
            (RecordType::A, IpAddr::V4(v4)) => RData::A(v4.into()),
            (RecordType::AAAA, IpAddr::V6(v6)) => RData::AAAA(v6.into()),
            _ => {
                return Err(Error::invalid_address(format!(
                    "{} does not fit a {} record",
                    address, self.record_type
                )));
            }
        };

        let mut record = Record::from_rdata(self.fqdn.clone(), RFC2136_TTL, rdata);
        record.set_dns_class(DNSClass::IN);
        Ok(record)
    }

    async fn exchange(&self, ctx: &CancellationToken, exchange: Exchange) -> Result<DnsResponse> {
        let label = exchange.label();
        let transport = self.transport.clone();

        bounded(ctx, DNS_EXCHANGE_TIMEOUT, label, async move {
            tokio::task::spawn_blocking(move || transport.send(exchange))
                .await
                .map_err(|e| Error::Other(format!("{} task failed: {}", label, e)))?
        })
        .await
    }
}

#[async_trait]
impl DnsUpdateHandler for Rfc2136Handler {
    async fn get(&mut self, ctx: &CancellationToken) -> Result<String> {
        tracing::debug!("Querying {} for {} {}", self.transport.server, self.fqdn, self.record_type);
        let response = self
            .exchange(
                ctx,
                Exchange::Query {
                    name: self.fqdn.clone(),
                    record_type: self.record_type,
                },
            )
            .await?;

        if response.response_code() != ResponseCode::NXDomain {
            check_response(&response, "dns query")?;
        }

        tracing::debug!("Got {} answer(s)", response.answers().len());
        let Some(last) = &self.last_rr else {
            return Ok(String::new());
        };

        let current = response
            .answers()
            .iter()
            .filter(|r| r.record_type() == self.record_type && r.name() == &self.fqdn)
            .find(|r| r.data() == last.data())
            .and_then(address_of);

        Ok(current.unwrap_or_default())
    }

    async fn create(&mut self, ctx: &CancellationToken, address: &str) -> Result<()> {
        let record = self.record(address)?;

        tracing::info!("Adding {} {} -> {} via RFC2136", self.record_type, self.fqdn, address);
        let response = self
            .exchange(ctx, Exchange::update(self.zone.clone(), record.clone(), None))
            .await?;
        check_response(&response, "dns update (add)")?;

        self.last_rr = Some(record);
        Ok(())
    }

    async fn update(&mut self, ctx: &CancellationToken, new_address: &str) -> Result<()> {
        let current = self
            .last_rr
            .clone()
            .ok_or_else(|| Error::missing_identifier("rfc2136: last written record is unknown"))?;
        let record = self.record(new_address)?;

        tracing::info!(
            "Replacing {} {} -> {} via RFC2136",
            self.record_type,
            self.fqdn,
            new_address
        );
        let response = self
            .exchange(
                ctx,
                Exchange::update(self.zone.clone(), record.clone(), Some(current)),
            )
            .await?;
        check_response(&response, "dns update (replace)")?;

        self.last_rr = Some(record);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
