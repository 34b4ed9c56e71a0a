//! mDNS browser for commissionable nodes (`_matterc._udp.local`).

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::Context;
use async_trait::async_trait;
use byteorder::ReadBytesExt;
use tokio::time::Instant;

use super::{Candidate, CommissioningMode, Discoverer, TransportKind};
use crate::error::{Error, Result};
use crate::mdns::{self as wire, DnsMessage};
use crate::onboarding::OnboardingIdentity;

pub const COMMISSIONABLE_SERVICE: &str = "_matterc._udp.local";

#[derive(Debug, Default, Clone)]
pub struct MdnsDiscoverer;

impl MdnsDiscoverer {
    pub fn new() -> Self {
        Self
    }
}

/// Short discriminator subtype, `_S<upper 4 bits>._sub._matterc._udp.local`.
/// Both QR and manual pairing codes carry those bits.
pub fn browse_name(identity: &OnboardingIdentity) -> String {
    format!("_S{}._sub.{}", identity.discriminator >> 8, COMMISSIONABLE_SERVICE)
}

fn parse_txt_records(data: &[u8]) -> anyhow::Result<HashMap<String, String>> {
    let mut cursor = Cursor::new(data);
    let mut out = HashMap::new();
    while (cursor.position() as usize) < data.len() {
        let len = cursor.read_u8()?;
        let mut buf = vec![0; len as usize];
        cursor.read_exact(buf.as_mut_slice())?;
        let entry = std::str::from_utf8(&buf)?;
        if let Some((k, v)) = entry.split_once('=') {
            out.insert(k.to_owned(), v.to_owned());
        }
    }
    Ok(out)
}

fn commissioning_mode(v: &str) -> Option<CommissioningMode> {
    match v {
        "0" => Some(CommissioningMode::No),
        "1" => Some(CommissioningMode::Yes),
        "2" => Some(CommissioningMode::WithPasscode),
        _ => None,
    }
}

/// Build candidate from one response. Fails when the response is not a complete
/// advertisement of `service`.
pub(crate) fn to_candidate(msg: &DnsMessage, service: &str) -> anyhow::Result<Candidate> {
    let svcname = format!("{}.", service.trim_end_matches('.'));
    let mut is_service = false;
    let mut ips = Vec::new();
    let mut port = None;
    let mut txt = None;
    for rr in msg.records() {
        if rr.name.ends_with(&svcname) {
            is_service = true;
        }
        match rr.rtype {
            wire::TYPE_A => {
                let arr: [u8; 4] = rr.rdata.as_slice().try_into().context("A record is not correct")?;
                ips.push(IpAddr::V4(Ipv4Addr::from(arr)));
            }
            wire::TYPE_AAAA => {
                let arr: [u8; 16] = rr.rdata.as_slice().try_into().context("AAAA record is not correct")?;
                ips.push(IpAddr::V6(Ipv6Addr::from(arr)));
            }
            wire::TYPE_SRV if rr.rdata.len() >= 6 => {
                port = Some(u16::from_be_bytes([rr.rdata[4], rr.rdata[5]]));
            }
            wire::TYPE_TXT => txt = Some(parse_txt_records(&rr.rdata)?),
            _ => {}
        }
    }
    if !is_service {
        anyhow::bail!("not {} service", service);
    }
    let txt = txt.context("no TXT record")?;
    let discriminator: u16 = txt
        .get("D")
        .context("no discriminator")?
        .parse()
        .context("discriminator is not a number")?;
    let (vendor_id, product_id) = match txt.get("VP") {
        Some(vp) => {
            let mut split = vp.split('+');
            let vendor = split.next().unwrap_or_default().parse::<u16>().context("bad vendor id")?;
            let product = match split.next() {
                Some(p) => p.parse::<u16>().context("bad product id")?,
                None => 0,
            };
            (vendor, product)
        }
        None => (0, 0),
    };
    // prefer ipv4, then whatever the responder used
    let ip = ips
        .iter()
        .find(|ip| ip.is_ipv4())
        .or(ips.first())
        .copied()
        .unwrap_or(msg.source.ip());
    let address = port.map(|port| SocketAddr::new(ip, port));

    Ok(Candidate {
        transport: TransportKind::Mdns,
        vendor_id,
        product_id,
        discriminator,
        address,
        name: txt.get("DN").cloned(),
        commissioning_mode: txt.get("CM").and_then(|v| commissioning_mode(v)),
    })
}

#[async_trait]
impl Discoverer for MdnsDiscoverer {
    fn kind(&self) -> TransportKind {
        TransportKind::Mdns
    }

    async fn search(&self, identity: &OnboardingIdentity, deadline: Instant) -> Result<Vec<Candidate>> {
        let stop = tokio_util::sync::CancellationToken::new();
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel::<DnsMessage>();
        let name = browse_name(identity);
        log::debug!("browsing {}", name);
        wire::discover(&name, wire::TYPE_PTR, sender, stop.child_token())
            .await
            .map_err(Error::Transport)?;
        let _guard = stop.drop_guard();

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        loop {
            let dns = match tokio::time::timeout_at(deadline, receiver.recv()).await {
                Ok(Some(dns)) => dns,
                Ok(None) | Err(_) => break,
            };
            match to_candidate(&dns, COMMISSIONABLE_SERVICE) {
                Ok(c) => {
                    if seen.insert((c.vendor_id, c.product_id, c.discriminator, c.address)) {
                        log::debug!("mdns candidate {}", c);
                        out.push(c);
                    }
                }
                Err(e) => log::trace!("skipping mdns response from {}: {:#}", dns.source, e),
            }
        }
        Ok(out)
    }
}
