//! Static destination route table.
//!
//! Maps a global destination id to the link that drives it and the
//! destination's local address on that link. Built once at startup from the
//! link configuration and read-only afterwards, so it can be shared behind an
//! `Arc` without locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{Addressing, DestinationId, LinkConfig, LocalAddress};

/// A resolved destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Global destination id
    pub destination: DestinationId,
    /// Link that owns the destination
    pub link: Arc<LinkConfig>,
    /// Address of the destination on its link
    pub local_address: LocalAddress,
}

impl Route {
    /// Identifier of the owning link.
    pub fn link_id(&self) -> &str {
        &self.link.id
    }
}

/// Read-only table of all configured routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<DestinationId, Route>,
    links: Vec<Arc<LinkConfig>>,
}

impl RouteTable {
    /// Build the table from link configurations, validating uniqueness and
    /// address derivation.
    pub fn build(links: &[LinkConfig]) -> Result<Self, RouteError> {
        let mut table = RouteTable::default();

        for config in links {
            if table.links.iter().any(|l| l.id == config.id) {
                return Err(RouteError::DuplicateLink(config.id.clone()));
            }

            // Overlap with earlier links is reported before addressing errors
            for &destination in &config.destinations {
                table.check_unclaimed(destination, &config.id)?;
            }

            let link = Arc::new(config.clone());
            let locals = derive_local_addresses(&link)?;

            for (&destination, local_address) in link.destinations.iter().zip(locals) {
                table.check_unclaimed(destination, &link.id)?;
                table.routes.insert(
                    destination,
                    Route {
                        destination,
                        link: link.clone(),
                        local_address,
                    },
                );
            }

            table.links.push(link);
        }

        Ok(table)
    }

    fn check_unclaimed(&self, destination: DestinationId, link: &str) -> Result<(), RouteError> {
        match self.routes.get(&destination) {
            Some(existing) => Err(RouteError::DuplicateDestination {
                destination,
                first: existing.link.id.clone(),
                second: link.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Resolve a destination to its link and local address.
    pub fn resolve(&self, destination: DestinationId) -> Result<&Route, RouteError> {
        self.routes
            .get(&destination)
            .ok_or(RouteError::UnknownDestination(destination))
    }

    /// All configured links in configuration order.
    pub fn links(&self) -> &[Arc<LinkConfig>] {
        &self.links
    }

    /// Find a link by identifier.
    pub fn link(&self, id: &str) -> Option<&Arc<LinkConfig>> {
        self.links.iter().find(|l| l.id == id)
    }

    /// Number of routed destinations.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Compute the local address of every destination of a link, in order.
fn derive_local_addresses(link: &LinkConfig) -> Result<Vec<LocalAddress>, RouteError> {
    match &link.addressing {
        Addressing::Index => Ok((0..link.destinations.len() as LocalAddress).collect()),
        Addressing::Offset => {
            let Some(&first) = link.destinations.first() else {
                return Ok(Vec::new());
            };
            link.destinations
                .iter()
                .map(|&destination| {
                    destination
                        .checked_sub(first)
                        .ok_or_else(|| RouteError::OffsetUnderflow {
                            link: link.id.clone(),
                            destination,
                            first,
                        })
                })
                .collect()
        }
        Addressing::Explicit { locals } => {
            if locals.len() != link.destinations.len() {
                return Err(RouteError::ExplicitLengthMismatch {
                    link: link.id.clone(),
                    destinations: link.destinations.len(),
                    locals: locals.len(),
                });
            }
            for (i, local) in locals.iter().enumerate() {
                if locals[..i].contains(local) {
                    return Err(RouteError::DuplicateLocalAddress {
                        link: link.id.clone(),
                        local: *local,
                    });
                }
            }
            Ok(locals.clone())
        }
    }
}

/// Errors raised while building or querying the route table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("No link configured for destination {0}")]
    UnknownDestination(DestinationId),

    #[error("Link id {0} is configured more than once")]
    DuplicateLink(String),

    #[error("Destination {destination} is claimed by both {first} and {second}")]
    DuplicateDestination {
        destination: DestinationId,
        first: String,
        second: String,
    },

    #[error("Destination {destination} on link {link} is below the first destination {first}")]
    OffsetUnderflow {
        link: String,
        destination: DestinationId,
        first: DestinationId,
    },

    #[error("Link {link} lists {destinations} destinations but {locals} local addresses")]
    ExplicitLengthMismatch {
        link: String,
        destinations: usize,
        locals: usize,
    },

    #[error("Local address {local} is used twice on link {link}")]
    DuplicateLocalAddress { link: String, local: LocalAddress },
}
