//! Session state shared by every menu step of one connection
//!
//! Tracks which tree the server currently holds so printing and predicting
//! are only issued once a tree exists, and stops tree operations after the
//! server reported a data error.

use std::fmt;
use std::net::TcpStream;

use tracing::warn;

use crate::channel::{ChannelOptions, Transport};
use crate::client::{ClientError, TreeClient};
use crate::predict::{Operator, Prediction};
use crate::protocol::{LearnOutcome, Listing, LoadOutcome};

/// Where the active tree came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeSource {
    Table(String),
    File(String),
}

impl TreeSource {
    pub fn name(&self) -> &str {
        match self {
            TreeSource::Table(name) | TreeSource::File(name) => name,
        }
    }
}

impl fmt::Display for TreeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeSource::Table(name) => write!(f, "table '{name}'"),
            TreeSource::File(name) => write!(f, "file '{name}'"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("no tree loaded yet: learn from a table or load a file first")]
    NoActiveTree,
    #[error("server reported a data error; reconnect to start over")]
    Poisoned,
}

/// One connection's worth of tree service state
pub struct Session<T: Transport = TcpStream> {
    client: TreeClient<T>,
    source: Option<TreeSource>,
    poisoned: bool,
}

impl Session<TcpStream> {
    pub fn connect(
        host: &str,
        port: u16,
        options: &ChannelOptions,
        max_turns: Option<usize>,
    ) -> Result<Self, SessionError> {
        let client = TreeClient::connect(host, port, options)?.with_max_turns(max_turns);
        Ok(Self::new(client))
    }
}

impl<T: Transport> Session<T> {
    pub fn new(client: TreeClient<T>) -> Self {
        Self {
            client,
            source: None,
            poisoned: false,
        }
    }

    /// Source of the tree the server holds for this session, if any
    pub fn active_tree(&self) -> Option<&TreeSource> {
        self.source.as_ref()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn list_tables(&mut self) -> Result<Listing, SessionError> {
        Ok(self.client.list_tables()?)
    }

    pub fn list_files(&mut self) -> Result<Listing, SessionError> {
        Ok(self.client.list_files()?)
    }

    pub fn learn_from_table(&mut self, table: &str) -> Result<LearnOutcome, SessionError> {
        self.check_usable()?;
        let outcome = self.client.learn_from_table(table)?;
        match outcome {
            LearnOutcome::Learned => self.source = Some(TreeSource::Table(table.to_string())),
            LearnOutcome::DataError => {
                warn!(table, "Server tree state undefined after data error");
                self.poisoned = true;
                self.source = None;
            }
            LearnOutcome::TableNotFound => {}
        }
        Ok(outcome)
    }

    pub fn load_from_file(&mut self, file: &str) -> Result<LoadOutcome, SessionError> {
        self.check_usable()?;
        let outcome = self.client.load_from_file(file)?;
        if outcome == LoadOutcome::Loaded {
            self.source = Some(TreeSource::File(file.to_string()));
        }
        Ok(outcome)
    }

    pub fn render_tree(&mut self) -> Result<String, SessionError> {
        self.check_active()?;
        Ok(self.client.render_tree()?)
    }

    pub fn predict(&mut self, operator: &mut impl Operator) -> Result<Prediction, SessionError> {
        self.check_active()?;
        Ok(self.client.predict(operator)?)
    }

    /// End the session and release the connection
    pub fn close(self) -> Result<(), SessionError> {
        Ok(self.client.close()?)
    }

    fn check_usable(&self) -> Result<(), SessionError> {
        if self.poisoned {
            Err(SessionError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn check_active(&self) -> Result<(), SessionError> {
        self.check_usable()?;
        if self.source.is_none() {
            return Err(SessionError::NoActiveTree);
        }
        Ok(())
    }
}
