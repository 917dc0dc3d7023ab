// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `tcp://host:port` endpoint addresses.
//!
//! Bind-side endpoints may use `*` as the host, meaning "all interfaces".
//! When the same string is used to connect, `*` resolves to loopback.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const SCHEME: &str = "tcp://";

/// Errors produced while parsing endpoint strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint '{0}' must start with tcp://")]
    MissingScheme(String),

    #[error("endpoint '{0}' has no port")]
    MissingPort(String),

    #[error("endpoint '{0}' has an invalid port")]
    InvalidPort(String),

    #[error("endpoint '{0}' has an empty host")]
    EmptyHost(String),

    #[error("endpoint list is empty")]
    EmptyList,
}

/// A TCP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a single `tcp://host:port` string.
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let trimmed = raw.trim();
        let rest = trimmed
            .strip_prefix(SCHEME)
            .ok_or_else(|| EndpointError::MissingScheme(trimmed.to_string()))?;

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingPort(trimmed.to_string()))?;

        if host.is_empty() {
            return Err(EndpointError::EmptyHost(trimmed.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(trimmed.to_string()))?;

        Ok(Self::new(host, port))
    }

    /// Parse a comma-separated, ordered list of endpoints.
    ///
    /// Blank entries are skipped; at least one endpoint is required.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, EndpointError> {
        let endpoints = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if endpoints.is_empty() {
            return Err(EndpointError::EmptyList);
        }
        Ok(endpoints)
    }

    /// Address suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        let host = if self.host == "*" {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{}:{}", host, self.port)
    }

    /// Address suitable for `TcpStream::connect`.
    pub fn connect_address(&self) -> String {
        let host = match self.host.as_str() {
            "*" | "0.0.0.0" => "127.0.0.1",
            other => other,
        };
        format!("{}:{}", host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", SCHEME, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
