use std::fmt;

use thiserror::Error;

use crate::mapping::{
    ForwardAddr, ListenAddr, Mapping, MappingType, ParseAddressError, ParseMappingTypeError,
};

use super::ParseStream;

/// A stored mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    pub listen: ListenAddr,
    pub to: ForwardAddr,
    pub mapping_type: MappingType,
}

impl From<&Mapping> for Forward {
    fn from(x: &Mapping) -> Self {
        Self {
            listen: x.listen_addr,
            to: x.forward_addr.clone(),
            mapping_type: x.mapping_type,
        }
    }
}

impl fmt::Display for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "forward {} to {} type {}",
            self.listen, self.to, self.mapping_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseForwardError {
    #[error("expected listen address")]
    ExpectedListenAddress,

    #[error("invalid listen address: {0}")]
    InvalidListenAddress(ParseAddressError),

    #[error("expected literal 'to'")]
    ExpectedTo,

    #[error("expected forward address")]
    ExpectedForwardAddress,

    #[error("invalid forward address: {0}")]
    InvalidForwardAddress(ParseAddressError),

    #[error("expected a mapping type for 'type'")]
    ExpectedType,

    #[error("{0}")]
    InvalidType(ParseMappingTypeError),
}

impl Forward {
    // Syntax: forward <listen> to <forward> [type <type>]
    pub fn parse(stream: &mut ParseStream<'_>) -> Result<Self, ParseForwardError> {
        use ParseForwardError::*;

        let listen = stream
            .next()
            .ok_or(ExpectedListenAddress)?
            .parse()
            .map_err(InvalidListenAddress)?;

        {
            let to = stream.next().ok_or(ExpectedTo)?;
            if to != "to" {
                return Err(ExpectedTo);
            }
        }

        let to = stream
            .next()
            .ok_or(ExpectedForwardAddress)?
            .parse()
            .map_err(InvalidForwardAddress)?;

        let mut mapping_type = MappingType::Tcp;

        while let Some(x) = stream.next() {
            match x {
                "type" => {
                    mapping_type = stream
                        .next()
                        .ok_or(ExpectedType)?
                        .parse()
                        .map_err(InvalidType)?;
                }

                _ => {
                    warn!("ignoring unknown property '{x}'");
                }
            }
        }

        Ok(Self {
            listen,
            to,
            mapping_type,
        })
    }
}
