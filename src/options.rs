use std::net::Ipv4Addr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DomainNameServer = 6,
    HostName = 12,
    DomainName = 15,
    RequestedIpAddress = 50,
    LeaseTime = 51,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DomainNameServer),
            12 => Ok(Self::HostName),
            15 => Ok(Self::DomainName),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            55 => Ok(Self::ParameterRequestList),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DhcpOption {
    SubnetMask(Ipv4Addr),
    Router(Ipv4Addr),
    DomainNameServer(Ipv4Addr),
    HostName(String),
    DomainName(String),
    RequestedIpAddress(Ipv4Addr),
    LeaseTime(u32),
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    Unknown(u8, Vec<u8>),
}

fn single_ip(code: OptionCode, data: &[u8]) -> Result<Ipv4Addr> {
    if data.len() < 4 {
        return Err(Error::InvalidPacket(format!(
            "Invalid length for option {}",
            code as u8
        )));
    }
    Ok(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
}

impl DhcpOption {
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => {
                Ok(Self::SubnetMask(single_ip(OptionCode::SubnetMask, data)?))
            }
            Ok(OptionCode::Router) => Ok(Self::Router(single_ip(OptionCode::Router, data)?)),
            Ok(OptionCode::DomainNameServer) => Ok(Self::DomainNameServer(single_ip(
                OptionCode::DomainNameServer,
                data,
            )?)),
            Ok(OptionCode::HostName) => {
                Ok(Self::HostName(String::from_utf8_lossy(data).to_string()))
            }
            Ok(OptionCode::DomainName) => {
                Ok(Self::DomainName(String::from_utf8_lossy(data).to_string()))
            }
            Ok(OptionCode::RequestedIpAddress) => Ok(Self::RequestedIpAddress(single_ip(
                OptionCode::RequestedIpAddress,
                data,
            )?)),
            Ok(OptionCode::LeaseTime) => {
                if data.len() != 4 {
                    return Err(Error::InvalidPacket("Invalid lease time length".to_string()));
                }
                Ok(Self::LeaseTime(u32::from_be_bytes([
                    data[0], data[1], data[2], data[3],
                ])))
            }
            Ok(OptionCode::MessageType) => {
                if data.len() != 1 {
                    return Err(Error::InvalidPacket(
                        "Invalid message type length".to_string(),
                    ));
                }
                let msg_type = MessageType::try_from(data[0]).map_err(|value| {
                    Error::InvalidPacket(format!("Unknown message type: {}", value))
                })?;
                Ok(Self::MessageType(msg_type))
            }
            Ok(OptionCode::ServerIdentifier) => Ok(Self::ServerIdentifier(single_ip(
                OptionCode::ServerIdentifier,
                data,
            )?)),
            Ok(OptionCode::ParameterRequestList) => {
                Ok(Self::ParameterRequestList(data.to_vec()))
            }
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => Err(Error::InvalidPacket(
                "Pad/End should not be parsed as options".to_string(),
            )),
            Err(unknown_code) => Ok(Self::Unknown(unknown_code, data.to_vec())),
        }
    }

    /// The wire code of this option.
    pub fn code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DomainNameServer(_) => OptionCode::DomainNameServer as u8,
            Self::HostName(_) => OptionCode::HostName as u8,
            Self::DomainName(_) => OptionCode::DomainName as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::ParameterRequestList(_) => OptionCode::ParameterRequestList as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SubnetMask(addr)
            | Self::Router(addr)
            | Self::DomainNameServer(addr)
            | Self::RequestedIpAddress(addr)
            | Self::ServerIdentifier(addr) => {
                let mut result = vec![self.code(), 4];
                result.extend_from_slice(&addr.octets());
                result
            }
            Self::HostName(name) | Self::DomainName(name) => {
                let bytes = name.as_bytes();
                let mut result = vec![self.code(), bytes.len() as u8];
                result.extend_from_slice(bytes);
                result
            }
            Self::LeaseTime(time) => {
                let mut result = vec![self.code(), 4];
                result.extend_from_slice(&time.to_be_bytes());
                result
            }
            Self::MessageType(msg_type) => {
                vec![self.code(), 1, *msg_type as u8]
            }
            Self::ParameterRequestList(params) => {
                let mut result = vec![self.code(), params.len() as u8];
                result.extend_from_slice(params);
                result
            }
            Self::Unknown(_, data) => {
                let mut result = vec![self.code(), data.len() as u8];
                result.extend_from_slice(data);
                result
            }
        }
    }
}
