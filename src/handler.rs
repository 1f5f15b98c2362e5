//! The DHCP responder.
//!
//! One handler instance exists at a time, owned by the supervisor and
//! bound to the current configuration. All lease state lives in the
//! shared registry, so a handler can be torn down and rebuilt at any
//! moment without losing bindings.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AddressRange, DhcpConfig, OptionDefaults};
use crate::error::{Error, Result};
use crate::ip::{ip_add, parse_ipv4};
use crate::lease::LeaseRegistry;
use crate::options::{DhcpOption, MessageType};
use crate::packet::{BOOTREQUEST, DhcpPacket};

pub const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
const RECV_BUFFER_SIZE: usize = 1500;

const FALLBACK_SUBNET_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

pub struct DhcpHandler {
    server_ip: Ipv4Addr,
    lease_ttl: Duration,
    ranges: Vec<AddressRange>,
    defaults: OptionDefaults,
    registry: Arc<dyn LeaseRegistry>,
    port: u16,
}

impl DhcpHandler {
    /// Builds a handler for the given validated configuration.
    pub fn new(config: &DhcpConfig, registry: Arc<dyn LeaseRegistry>, port: u16) -> Result<Self> {
        Ok(Self {
            server_ip: config.server_ipv4()?,
            lease_ttl: Duration::from_secs(u64::from(config.lease_ttl_seconds())),
            ranges: config.ranges.clone(),
            defaults: config.options.clone(),
            registry,
            port,
        })
    }

    /// Serves DHCP until the serve loop fails or the token is
    /// cancelled. The socket is released on every exit path.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let socket = self.create_socket()?;
        info!("DHCP handler listening on port {}", self.port);

        tokio::select! {
            result = self.serve(&socket) => result,
            _ = token.cancelled() => {
                info!("DHCP handler stopped");
                Ok(())
            }
        }
    }

    fn create_socket(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port);
        socket
            .bind(&bind_addr.into())
            .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error)))?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket)
            .map_err(|error| Error::Socket(format!("Failed to convert to tokio socket: {}", error)))
    }

    /// Requests are served strictly one at a time; the handler has no
    /// internal state to protect.
    async fn serve(&self, socket: &UdpSocket) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            let (size, source) = socket.recv_from(&mut buffer).await?;

            let request = match DhcpPacket::parse(&buffer[..size]) {
                Ok(packet) => packet,
                Err(error) => {
                    debug!("Ignoring malformed packet from {}: {}", source, error);
                    continue;
                }
            };
            if request.op != BOOTREQUEST {
                continue;
            }

            if let Some(reply) = self.handle_message(&request).await {
                let destination = reply_destination(&request, &reply);
                if let Err(error) = socket.send_to(&reply.encode(), destination).await {
                    warn!("Failed to send reply to {}: {}", destination, error);
                }
            }
        }
    }

    /// Dispatches one inbound message, returning the reply to send, if
    /// any. Split from the serve loop so the exchange logic can be
    /// exercised without sockets.
    pub async fn handle_message(&self, request: &DhcpPacket) -> Option<DhcpPacket> {
        let message_type = request.message_type()?;
        let chaddr = request.mac_address();
        info!("{} from {}", message_type, chaddr);

        match message_type {
            MessageType::Discover => self.handle_discover(request, &chaddr).await,
            MessageType::Request => self.handle_request(request, &chaddr).await,
            MessageType::Release | MessageType::Decline => {
                self.handle_release(&chaddr).await;
                None
            }
            other => {
                debug!("Ignoring {} message", other);
                None
            }
        }
    }

    async fn handle_discover(&self, request: &DhcpPacket, chaddr: &str) -> Option<DhcpPacket> {
        // A client that already holds leases is offered one of them;
        // the registry returns them sorted by IP and we prefer one that
        // has not expired yet, so repeated Discovers get a stable offer.
        let existing = match self.registry.list_by_chaddr(chaddr).await {
            Ok(leases) => leases,
            Err(error) => {
                warn!("Failed to list leases for {}: {}", chaddr, error);
                Vec::new()
            }
        };
        let ip = existing
            .iter()
            .find(|lease| !lease.is_expired())
            .or_else(|| existing.first())
            .map(|lease| lease.ip);

        let ip = match ip {
            Some(ip) => Some(ip),
            None => self.find_free_lease().await,
        };

        match ip {
            Some(ip) => {
                info!("Offering {} to {}", ip, chaddr);
                Some(self.reply_with_options(request, MessageType::Offer, ip))
            }
            None => {
                info!("No free IP found for {}", chaddr);
                None
            }
        }
    }

    async fn handle_request(&self, request: &DhcpPacket, chaddr: &str) -> Option<DhcpPacket> {
        if let Some(server_id) = request.server_identifier()
            && server_id != self.server_ip
        {
            // Message not for this dhcp server.
            debug!("Request from {} is for server {}", chaddr, server_id);
            return None;
        }

        let req_ip = request.requested_ip().or_else(|| {
            (request.ciaddr != Ipv4Addr::UNSPECIFIED).then_some(request.ciaddr)
        });
        let Some(req_ip) = req_ip else {
            return Some(self.nak(request));
        };
        if req_ip.is_unspecified() {
            return Some(self.nak(request));
        }

        if !self.ranges.iter().any(|range| range.contains(req_ip)) {
            info!("NAK to {}: {} not in any range", chaddr, req_ip);
            return Some(self.nak(request));
        }

        // The IP must be free or already bound to this client.
        match self.registry.get_by_ip(req_ip).await {
            Err(error) if error.is_not_found() => {}
            Ok(lease) if lease.chaddr == chaddr => {}
            Ok(lease) => {
                info!("NAK to {}: {} held by {}", chaddr, req_ip, lease.chaddr);
                return Some(self.nak(request));
            }
            Err(error) => {
                warn!("Failed to look up {}: {}", req_ip, error);
                return Some(self.nak(request));
            }
        }

        match self
            .registry
            .create(req_ip, chaddr, request.hostname(), self.lease_ttl)
            .await
        {
            Ok(lease) => {
                info!(
                    "ACK {} to {} (expires in {}s)",
                    req_ip,
                    chaddr,
                    lease.remaining_seconds()
                );
                Some(self.reply_with_options(request, MessageType::Ack, req_ip))
            }
            Err(error) => {
                warn!("Failed to create lease for {}: {}", req_ip, error);
                Some(self.nak(request))
            }
        }
    }

    /// Release and Decline both drop every lease held by the caller.
    /// Neither sends a reply; failures are logged and swallowed.
    async fn handle_release(&self, chaddr: &str) {
        let leases = match self.registry.list_by_chaddr(chaddr).await {
            Ok(leases) => leases,
            Err(error) => {
                warn!("Failed to list leases for {}: {}", chaddr, error);
                return;
            }
        };
        for lease in leases {
            info!("Releasing {} held by {}", lease.ip, chaddr);
            if let Err(error) = self.registry.remove(&lease).await {
                warn!("Failed to remove lease for {}: {}", lease.ip, error);
            }
        }
    }

    /// Picks an IP from the configured ranges that is neither actively
    /// leased nor leased to another client.
    ///
    /// Ranges and offsets are visited in random order so allocations
    /// spread across the pool; that keeps concurrent operators from
    /// piling onto the same addresses and smooths reassignment after a
    /// mass expiry.
    async fn find_free_lease(&self) -> Option<Ipv4Addr> {
        let plan: Vec<(Ipv4Addr, Vec<u8>)> = {
            let mut rng = rand::thread_rng();
            let mut ranges: Vec<&AddressRange> = self.ranges.iter().collect();
            ranges.shuffle(&mut rng);
            ranges
                .into_iter()
                .filter_map(|range| {
                    let start = range.start_ipv4()?;
                    let mut offsets: Vec<u8> = (0..range.length).map(|o| o as u8).collect();
                    offsets.shuffle(&mut rng);
                    Some((start, offsets))
                })
                .collect()
        };

        for (start, offsets) in plan {
            for offset in offsets {
                let candidate = ip_add(start, offset);
                match self.registry.get_by_ip(candidate).await {
                    Err(error) if error.is_not_found() => return Some(candidate),
                    Ok(lease) if lease.is_expired() => {
                        // Reclaim, but only hand the IP out once the
                        // stale record is actually gone.
                        match self.registry.remove(&lease).await {
                            Ok(()) => return Some(candidate),
                            Err(error) => {
                                warn!("Failed to remove expired lease {}: {}", candidate, error);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!("Failed to look up {}: {}", candidate, error);
                    }
                }
            }
        }
        None
    }

    /// Offer/ACK reply carrying the lease duration and the configured
    /// options, filtered by the client's parameter request list.
    fn reply_with_options(
        &self,
        request: &DhcpPacket,
        message_type: MessageType,
        your_ip: Ipv4Addr,
    ) -> DhcpPacket {
        let mut options = vec![
            DhcpOption::ServerIdentifier(self.server_ip),
            DhcpOption::LeaseTime(self.lease_ttl.as_secs() as u32),
        ];
        options.extend(self.assemble_options(request));
        DhcpPacket::create_reply(request, message_type, self.server_ip, your_ip, options)
    }

    /// NAK: zero yiaddr, no lease duration.
    fn nak(&self, request: &DhcpPacket) -> DhcpPacket {
        DhcpPacket::create_reply(
            request,
            MessageType::Nak,
            self.server_ip,
            Ipv4Addr::UNSPECIFIED,
            vec![DhcpOption::ServerIdentifier(self.server_ip)],
        )
    }

    /// The configured option defaults, filtered and ordered by the
    /// client's parameter request list when it sent one.
    fn assemble_options(&self, request: &DhcpPacket) -> Vec<DhcpOption> {
        let all = self.build_options();
        match request.parameter_request_list() {
            Some(codes) => codes
                .iter()
                .filter_map(|code| all.iter().find(|option| option.code() == *code).cloned())
                .collect(),
            None => all,
        }
    }

    fn build_options(&self) -> Vec<DhcpOption> {
        let subnet_mask = self
            .defaults
            .subnet_mask
            .as_deref()
            .and_then(parse_ipv4)
            .unwrap_or(FALLBACK_SUBNET_MASK);
        let mut options = vec![DhcpOption::SubnetMask(subnet_mask)];
        if let Some(router) = self.defaults.router_ip.as_deref().and_then(parse_ipv4) {
            options.push(DhcpOption::Router(router));
        }
        if let Some(dns) = self.defaults.dns_ip.as_deref().and_then(parse_ipv4) {
            options.push(DhcpOption::DomainNameServer(dns));
        }
        if let Some(domain) = &self.defaults.domain {
            options.push(DhcpOption::DomainName(domain.clone()));
        }
        options
    }
}

/// Where to send a reply: the relay if one forwarded the request, the
/// broadcast address for NAKs and clients without an address yet,
/// otherwise directly to the client.
fn reply_destination(request: &DhcpPacket, reply: &DhcpPacket) -> SocketAddr {
    let is_nak = reply.message_type() == Some(MessageType::Nak);

    if request.giaddr != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(request.giaddr.into(), DHCP_SERVER_PORT)
    } else if is_nak || request.is_broadcast() || request.ciaddr == Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(Ipv4Addr::BROADCAST.into(), DHCP_CLIENT_PORT)
    } else {
        SocketAddr::new(request.ciaddr.into(), DHCP_CLIENT_PORT)
    }
}
