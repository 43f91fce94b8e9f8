//! Drone session
//!
//! This module handles:
//! - Owning the drone link for the lifetime of the console
//! - Tracking whether the connect sequence has completed
//! - Establishing the connection through the [`Connector`]

mod connector;

pub use connector::Connector;

use crate::link::DroneLink;

/// The console's single drone session
pub struct Session<L> {
    link: L,
    connected: bool,
}

impl<L: DroneLink> Session<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The link, only once the connect sequence has completed
    pub fn connected_link(&self) -> Option<&L> {
        self.connected.then_some(&self.link)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn mark_connected(&mut self) {
        self.connected = true;
    }
}
