//! Minimal mDNS client: query encoding, response parsing and multicast listeners.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::{Context, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use socket2::{Domain, Protocol, Type};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

pub const TYPE_A: u16 = 1;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const QTYPE_ANY: u16 = 0xff;

const CLASS_IN: u16 = 1;
const FLAG_RESPONSE: u16 = 0x8000;
const MDNS_PORT: u16 = 5353;
const MDNS_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MDNS_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);
const MAX_POINTER_DEPTH: usize = 16;

/// Fixed 12 byte message header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub id: u16,
    pub flags: u16,
    pub questions: u16,
    pub answers: u16,
    pub authority: u16,
    pub additional: u16,
}

impl Header {
    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        for v in [
            self.id,
            self.flags,
            self.questions,
            self.answers,
            self.authority,
            self.additional,
        ] {
            out.write_u16::<BigEndian>(v)?;
        }
        Ok(())
    }

    fn read(r: &mut Reader) -> Result<Self> {
        Ok(Self {
            id: r.u16()?,
            flags: r.u16()?,
            questions: r.u16()?,
            answers: r.u16()?,
            authority: r.u16()?,
            additional: r.u16()?,
        })
    }
}

/// Write dotted name as length-prefixed segments.
pub(crate) fn encode_label(label: &str, out: &mut Vec<u8>) -> Result<()> {
    for seg in label.split('.').filter(|s| !s.is_empty()) {
        let len = u8::try_from(seg.len())
            .ok()
            .filter(|l| *l <= 63)
            .context(format!("label segment too long: {}", seg))?;
        out.push(len);
        out.extend_from_slice(seg.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// One-question query with unicast-response bit clear.
pub fn create_query(label: &str, qtype: u16) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + label.len());
    Header {
        questions: 1,
        ..Default::default()
    }
    .write(&mut out)?;
    encode_label(label, &mut out)?;
    out.write_u16::<BigEndian>(qtype)?;
    out.write_u16::<BigEndian>(CLASS_IN)?;
    Ok(out)
}

/// Bounds-checked cursor over a whole message; names may point anywhere in it.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|e| *e <= self.data.len())
            .context("truncated dns message")?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    fn name(&mut self) -> Result<String> {
        let mut out = String::new();
        self.name_into(&mut out, 0)?;
        Ok(out)
    }

    fn name_into(&mut self, out: &mut String, depth: usize) -> Result<()> {
        loop {
            let len = self.u8()?;
            match len & 0xc0 {
                0 if len == 0 => return Ok(()),
                0 => {
                    let seg = self.take(len as usize)?;
                    out.push_str(std::str::from_utf8(seg)?);
                    out.push('.');
                }
                0xc0 => {
                    if depth >= MAX_POINTER_DEPTH {
                        anyhow::bail!("label compression loop");
                    }
                    let offset = (((len & 0x3f) as usize) << 8) | self.u8()? as usize;
                    let mut target = Reader {
                        data: self.data,
                        pos: offset,
                    };
                    return target.name_into(out, depth + 1);
                }
                _ => anyhow::bail!("unsupported label type 0x{:02x}", len),
            }
        }
    }

    fn question(&mut self) -> Result<Question> {
        Ok(Question {
            name: self.name()?,
            qtype: self.u16()?,
            class: self.u16()?,
        })
    }

    fn record(&mut self) -> Result<Record> {
        let name = self.name()?;
        let rtype = self.u16()?;
        let class = self.u16()?;
        let ttl = self.u32()?;
        let len = self.u16()? as usize;
        Ok(Record {
            name,
            rtype,
            class,
            ttl,
            rdata: self.take(len)?.to_vec(),
        })
    }

    fn records(&mut self, count: u16) -> Result<Vec<Record>> {
        (0..count).map(|_| self.record()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Fully qualified, with trailing dot.
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub class: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub source: SocketAddr,
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub additional: Vec<Record>,
}

impl DnsMessage {
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    /// Answers and additional records together; responders differ in where they put them.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.answers.iter().chain(self.additional.iter())
    }
}

/// Parse whole message. Authority records are read and dropped.
pub fn parse_dns(data: &[u8], source: SocketAddr) -> Result<DnsMessage> {
    let mut r = Reader::new(data);
    let header = Header::read(&mut r)?;
    let questions = (0..header.questions)
        .map(|_| r.question())
        .collect::<Result<Vec<_>>>()?;
    let answers = r.records(header.answers)?;
    r.records(header.authority)?;
    let additional = r.records(header.additional)?;
    Ok(DnsMessage {
        source,
        id: header.id,
        flags: header.flags,
        questions,
        answers,
        additional,
    })
}

fn multicast_socket(interface: Option<u32>) -> Result<(tokio::net::UdpSocket, SocketAddr)> {
    let (domain, bind, group): (Domain, SocketAddr, SocketAddr) = match interface {
        None => (
            Domain::IPV4,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, MDNS_PORT)),
            SocketAddr::from((MDNS_V4, MDNS_PORT)),
        ),
        Some(_) => (
            Domain::IPV6,
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, MDNS_PORT)),
            SocketAddr::from((MDNS_V6, MDNS_PORT)),
        ),
    };
    let stdsocket = socket2::Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    stdsocket.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    stdsocket.set_reuse_port(true)?;
    if domain == Domain::IPV6 {
        stdsocket.set_only_v6(true)?;
    }
    stdsocket
        .bind(&socket2::SockAddr::from(bind))
        .context(format!("bind {}", bind))?;
    match interface {
        None => stdsocket.join_multicast_v4(&MDNS_V4, &Ipv4Addr::UNSPECIFIED)?,
        Some(index) => {
            stdsocket.join_multicast_v6(&MDNS_V6, index)?;
            stdsocket.set_multicast_if_v6(index)?;
        }
    }
    stdsocket.set_nonblocking(true)?;
    Ok((tokio::net::UdpSocket::from_std(stdsocket.into())?, group))
}

async fn listen(
    socket: tokio::net::UdpSocket,
    group: SocketAddr,
    query: Vec<u8>,
    sender: UnboundedSender<DnsMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    socket.send_to(&query, group).await?;
    let mut buf = vec![0; 9000];
    loop {
        let (n, addr) = tokio::select! {
            v = socket.recv_from(&mut buf) => v?,
            _ = cancel.cancelled() => return Ok(())
        };
        let dns = match parse_dns(&buf[..n], addr) {
            Ok(dns) => dns,
            Err(e) => {
                log::trace!("ignoring malformed mdns packet from {}: {:#}", addr, e);
                continue;
            }
        };
        if !dns.is_response() {
            continue;
        }
        if sender.send(dns).is_err() {
            return Ok(());
        }
    }
}

/// Send query over ipv4 and every ipv6 interface and forward responses until `stop` fires.
///
/// Fails only when ipv4 socket can't be set up; ipv6 interfaces are best effort.
pub async fn discover(
    label: &str,
    qtype: u16,
    sender: UnboundedSender<DnsMessage>,
    stop: CancellationToken,
) -> Result<()> {
    let query = create_query(label, qtype)?;
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => {
            for iface in ifaces {
                if !iface.ip().is_ipv6() {
                    continue;
                }
                let Some(index) = iface.index else {
                    continue;
                };
                let (socket, group) = match multicast_socket(Some(index)) {
                    Ok(v) => v,
                    Err(e) => {
                        log::debug!("mdns on interface {} unavailable: {:#}", index, e);
                        continue;
                    }
                };
                let sender = sender.clone();
                let query = query.clone();
                let stop = stop.child_token();
                tokio::spawn(async move {
                    if let Err(e) = listen(socket, group, query, sender, stop).await {
                        log::debug!("mdns on interface {} failed: {:#}", index, e);
                    }
                });
            }
        }
        Err(e) => log::warn!("can't list interfaces: {}", e),
    }

    let (socket, group) = multicast_socket(None)?;
    let stop = stop.child_token();
    tokio::spawn(async move {
        if let Err(e) = listen(socket, group, query, sender, stop).await {
            log::warn!("mdns ipv4 listener failed: {:#}", e);
        }
    });
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build response message with given answer records.
    pub(crate) fn response(records: &[(&str, u16, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        Header {
            flags: 0x8400,
            answers: records.len() as u16,
            ..Default::default()
        }
        .write(&mut out)
        .unwrap();
        for (name, rtype, rdata) in records {
            encode_label(name, &mut out).unwrap();
            out.write_u16::<BigEndian>(*rtype).unwrap();
            out.write_u16::<BigEndian>(CLASS_IN).unwrap();
            out.write_u32::<BigEndian>(120).unwrap();
            out.write_u16::<BigEndian>(rdata.len() as u16).unwrap();
            out.extend_from_slice(rdata);
        }
        out
    }

    fn src() -> SocketAddr {
        "192.168.1.10:5353".parse().unwrap()
    }

    #[test]
    fn query_encoding() {
        let q = create_query("_matterc._udp.local", QTYPE_ANY).unwrap();
        assert_eq!(&q[..12], &[0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(q[12], 8);
        assert_eq!(&q[13..21], b"_matterc");
        assert_eq!(&q[q.len() - 4..], &[0, 0xff, 0, 1]);
        let parsed = parse_dns(&q, src()).unwrap();
        assert!(!parsed.is_response());
        assert_eq!(parsed.questions[0].name, "_matterc._udp.local.");
        assert_eq!(parsed.questions[0].qtype, QTYPE_ANY);
        assert!(create_query(&"x".repeat(64), TYPE_A).is_err());
    }

    #[test]
    fn parse_response_with_pointer() {
        let mut data = response(&[("host.local", TYPE_A, vec![10, 0, 0, 1])]);
        // second answer: name is pointer to offset 12
        data[7] = 2;
        data.extend_from_slice(&[0xc0, 12, 0, 1, 0, 1, 0, 0, 0, 120, 0, 4, 10, 0, 0, 2]);
        let msg = parse_dns(&data, src()).unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.answers.len(), 2);
        assert_eq!(msg.answers[1].name, "host.local.");
        assert_eq!(msg.answers[1].rdata, vec![10, 0, 0, 2]);
    }

    #[test]
    fn parse_rejects_malformed() {
        let mut data = response(&[]);
        data[7] = 1;
        data.extend_from_slice(&[0xc0, 12]);
        assert!(parse_dns(&data, src()).is_err());
        assert!(parse_dns(&[0, 1, 2], src()).is_err());
        // record claims more rdata than present
        let mut data = response(&[("a.local", TYPE_A, vec![1, 2, 3, 4])]);
        data.truncate(data.len() - 2);
        assert!(parse_dns(&data, src()).is_err());
    }
}
