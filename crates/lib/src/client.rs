use std::net::TcpStream;

use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, ChannelOptions, Transport, unexpected};
use crate::predict::{Operator, PredictError, Prediction, PredictionSession};
use crate::protocol::{LearnOutcome, Listing, LoadOutcome, ResultSentinel, TaskCode, Unit};

/// Errors from the tree service client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("unexpected reply to {task}: {reply}")]
    UnexpectedReply { task: TaskCode, reply: String },
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error("connection is out of step with the server after an earlier failure; reconnect")]
    Desynchronized,
}

/// Issues the six service tasks over an owned channel.
///
/// Any failed exchange leaves unread replies or an unanswered query behind,
/// so the client refuses every later task with
/// [`ClientError::Desynchronized`] without touching the connection.
/// Sentinel outcomes such as `fileNotFound` are complete exchanges and do
/// not count as failures.
pub struct TreeClient<T: Transport = TcpStream> {
    channel: Channel<T>,
    max_turns: Option<usize>,
    desynchronized: bool,
}

impl TreeClient<TcpStream> {
    /// Connect to the service at `host:port`
    pub fn connect(host: &str, port: u16, options: &ChannelOptions) -> Result<Self, ClientError> {
        Ok(Self::new(Channel::open(host, port, options)?))
    }
}

impl<T: Transport> TreeClient<T> {
    pub fn new(channel: Channel<T>) -> Self {
        Self {
            channel,
            max_turns: None,
            desynchronized: false,
        }
    }

    /// Abort predictions that go deeper than `limit` queries
    pub fn with_max_turns(mut self, limit: Option<usize>) -> Self {
        self.max_turns = limit;
        self
    }

    /// Whether an earlier failure made the connection unusable
    pub fn is_desynchronized(&self) -> bool {
        self.desynchronized
    }

    /// List training tables in the database
    pub fn list_tables(&mut self) -> Result<Listing, ClientError> {
        self.exchange(|c| c.list(TaskCode::GetTablesFromDb, ResultSentinel::NoTablesFound))
    }

    /// List serialized trees in the archive
    pub fn list_files(&mut self) -> Result<Listing, ClientError> {
        self.exchange(|c| c.list(TaskCode::GetFilesFromArchive, ResultSentinel::NoFilesFound))
    }

    /// Learn a tree from `table`
    pub fn learn_from_table(&mut self, table: &str) -> Result<LearnOutcome, ClientError> {
        self.exchange(|c| {
            let task = TaskCode::LearnTreeFromDb;
            let outcome = match c.call_for_sentinel(task, table)? {
                ResultSentinel::Ok => LearnOutcome::Learned,
                ResultSentinel::DataError => LearnOutcome::DataError,
                ResultSentinel::TableNotFound => LearnOutcome::TableNotFound,
                other => {
                    return Err(ClientError::UnexpectedReply {
                        task,
                        reply: other.to_string(),
                    });
                }
            };
            info!(table, ?outcome, "Learn finished");
            Ok(outcome)
        })
    }

    /// Load the tree serialized in `file`
    pub fn load_from_file(&mut self, file: &str) -> Result<LoadOutcome, ClientError> {
        self.exchange(|c| {
            let task = TaskCode::GetTreeFromFile;
            let outcome = match c.call_for_sentinel(task, file)? {
                ResultSentinel::Ok => LoadOutcome::Loaded,
                ResultSentinel::FileNotFound => LoadOutcome::FileNotFound,
                other => {
                    return Err(ClientError::UnexpectedReply {
                        task,
                        reply: other.to_string(),
                    });
                }
            };
            info!(file, ?outcome, "Load finished");
            Ok(outcome)
        })
    }

    /// Fetch the text rendering of the active tree.
    ///
    /// The server only answers sensibly once a tree was learned or loaded;
    /// [`crate::session::Session`] enforces that ordering.
    pub fn render_tree(&mut self) -> Result<String, ClientError> {
        self.exchange(|c| {
            c.channel.send_request(TaskCode::PrintTree, None)?;
            let text = c.channel.receive_text()?;
            debug!(bytes = text.len(), "Received tree render");
            Ok(text)
        })
    }

    /// Walk the active tree, asking `operator` at every internal node
    pub fn predict(&mut self, operator: &mut impl Operator) -> Result<Prediction, ClientError> {
        self.exchange(|c| {
            let session = PredictionSession::begin(&mut c.channel, c.max_turns)?;
            Ok(session.run(operator)?)
        })
    }

    /// Release the connection
    pub fn close(self) -> Result<(), ClientError> {
        Ok(self.channel.close()?)
    }

    /// Run one task, refusing it up front once the channel is out of step
    fn exchange<R>(
        &mut self,
        task: impl FnOnce(&mut Self) -> Result<R, ClientError>,
    ) -> Result<R, ClientError> {
        if self.desynchronized {
            return Err(ClientError::Desynchronized);
        }
        let result = task(self);
        if let Err(e) = &result {
            warn!("Connection unusable after failed exchange: {e}");
            self.desynchronized = true;
        }
        result
    }

    fn list(&mut self, task: TaskCode, empty: ResultSentinel) -> Result<Listing, ClientError> {
        self.channel.send_request(task, None)?;
        let reply = self.channel.receive()?;
        let listing = Listing::from_unit(reply, empty).map_err(ChannelError::Decode)?;
        debug!(%task, ?listing, "Listing received");
        Ok(listing)
    }

    fn call_for_sentinel(&mut self, task: TaskCode, argument: &str) -> Result<ResultSentinel, ClientError> {
        self.channel.send_request(task, Some(argument))?;
        match self.channel.receive()? {
            Unit::Text(reply) => {
                ResultSentinel::parse(&reply).ok_or(ClientError::UnexpectedReply { task, reply })
            }
            other => Err(unexpected("str", &other).into()),
        }
    }
}
