//! Interactive prediction: a remote walk down the active tree
//!
//! After the predict task is sent, the server reports one node per turn.
//! Internal nodes arrive as a `QUERY` tag, a prompt and a branch count; the
//! client answers with the branch index the operator picked. A leaf arrives
//! as an `OK` tag followed by the predicted value and ends the walk.
//!
//! The session holds the channel mutably for its whole life, so no other
//! task can be interleaved until it finishes or fails.

use std::io;
use std::net::TcpStream;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, Transport};
use crate::protocol::{PredictionTurn, QUERY_TAG, TERMINAL_TAG, TaskCode, Unit};

/// Source of branch choices during a prediction
pub trait Operator {
    /// Present the decision at the current node
    fn show_query(&mut self, prompt: &str, branch_count: u32) -> io::Result<()>;

    /// Ask for a branch index. `Ok(None)` means no more input is coming.
    fn read_choice(&mut self, branch_count: u32) -> io::Result<Option<i64>>;

    /// Called for every answer outside `0..branch_count`; the answer is not sent
    fn reject_choice(&mut self, _choice: i64, _branch_count: u32) -> io::Result<()> {
        Ok(())
    }
}

/// Prediction errors.
///
/// All of them leave the channel out of step with the server, so the
/// [`crate::TreeClient`] that ran the walk refuses further tasks.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("malformed prediction turn: {0}")]
    Malformed(String),
    #[error("prediction did not reach a leaf within {0} turns")]
    TurnLimit(usize),
    #[error("branch choice {choice} outside 0..{branch_count}")]
    ChoiceOutOfRange { choice: i64, branch_count: u32 },
    #[error("prediction abandoned: operator input ended")]
    Cancelled,
    #[error("operator I/O failed: {0}")]
    Operator(io::Error),
}

/// Where the walk currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionState {
    /// Predict task sent, nothing received yet
    Started,
    /// Waiting for the next node
    AwaitingTurn,
    /// Waiting for the operator's answer to a query
    Choosing { branch_count: u32 },
    /// Leaf reached
    Finished,
}

/// Result of a completed walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    /// Value carried by the leaf
    pub value: String,
    /// Branch index chosen at each internal node, root first
    pub path: Vec<u32>,
}

impl Prediction {
    /// Depth of the leaf that was reached
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

pub struct PredictionSession<'a, T: Transport = TcpStream> {
    channel: &'a mut Channel<T>,
    max_turns: Option<usize>,
    state: PredictionState,
    path: Vec<u32>,
}

impl<'a, T: Transport> PredictionSession<'a, T> {
    /// Send the predict task and take over the channel
    pub fn begin(channel: &'a mut Channel<T>, max_turns: Option<usize>) -> Result<Self, PredictError> {
        channel.send_request(TaskCode::PredictTree, None)?;
        Ok(Self {
            channel,
            max_turns,
            state: PredictionState::Started,
            path: Vec::new(),
        })
    }

    pub fn state(&self) -> PredictionState {
        self.state
    }

    /// Receive the next node from the server
    pub fn next_turn(&mut self) -> Result<PredictionTurn, PredictError> {
        match self.state {
            PredictionState::Started | PredictionState::AwaitingTurn => {}
            other => {
                return Err(PredictError::Malformed(format!(
                    "next turn requested in state {other:?}"
                )));
            }
        }

        let tag = match self.channel.receive()? {
            Unit::Text(tag) => tag,
            other => {
                return Err(PredictError::Malformed(format!(
                    "expected turn tag, got {} unit",
                    other.kind()
                )));
            }
        };

        match tag.as_str() {
            QUERY_TAG => {
                let depth = self.path.len();
                if let Some(limit) = self.max_turns.filter(|limit| depth >= *limit) {
                    return Err(PredictError::TurnLimit(limit));
                }
                let prompt = self.channel.receive_text()?;
                let branch_count = parse_branch_count(self.channel.receive()?)?;
                self.state = PredictionState::Choosing { branch_count };
                debug!(depth = self.path.len(), branch_count, "Query node");
                Ok(PredictionTurn::Query {
                    prompt,
                    branch_count,
                })
            }
            TERMINAL_TAG => {
                let value = match self.channel.receive()? {
                    Unit::Text(s) => s,
                    Unit::Int(n) => n.to_string(),
                    Unit::List(_) => {
                        return Err(PredictError::Malformed(
                            "predicted value is a list".to_string(),
                        ));
                    }
                };
                self.state = PredictionState::Finished;
                Ok(PredictionTurn::Terminal { value })
            }
            other => Err(PredictError::Malformed(format!("unknown turn tag {other:?}"))),
        }
    }

    /// Send the branch picked for the current query
    pub fn answer(&mut self, choice: i64) -> Result<(), PredictError> {
        let PredictionState::Choosing { branch_count } = self.state else {
            return Err(PredictError::Malformed(format!(
                "answer sent in state {:?}",
                self.state
            )));
        };

        let index = u32::try_from(choice)
            .ok()
            .filter(|c| *c < branch_count)
            .ok_or(PredictError::ChoiceOutOfRange {
                choice,
                branch_count,
            })?;

        self.channel.send(&Unit::Int(i64::from(index)))?;
        self.path.push(index);
        self.state = PredictionState::AwaitingTurn;
        Ok(())
    }

    /// Drive the walk to a leaf, asking the operator at every internal node
    pub fn run(mut self, operator: &mut impl Operator) -> Result<Prediction, PredictError> {
        loop {
            match self.next_turn()? {
                PredictionTurn::Query {
                    prompt,
                    branch_count,
                } => {
                    operator
                        .show_query(&prompt, branch_count)
                        .map_err(PredictError::Operator)?;
                    let choice = ask_until_valid(operator, branch_count)?;
                    self.answer(choice)?;
                }
                PredictionTurn::Terminal { value } => {
                    info!(depth = self.path.len(), %value, "Prediction complete");
                    return Ok(Prediction {
                        value,
                        path: self.path,
                    });
                }
            }
        }
    }
}

fn ask_until_valid(operator: &mut impl Operator, branch_count: u32) -> Result<i64, PredictError> {
    loop {
        match operator
            .read_choice(branch_count)
            .map_err(PredictError::Operator)?
        {
            None => return Err(PredictError::Cancelled),
            Some(choice) if (0..i64::from(branch_count)).contains(&choice) => return Ok(choice),
            Some(choice) => {
                warn!(choice, branch_count, "Rejected out-of-range branch choice");
                operator
                    .reject_choice(choice, branch_count)
                    .map_err(PredictError::Operator)?;
            }
        }
    }
}

/// The count arrives as an integer, or as text from older servers
fn parse_branch_count(unit: Unit) -> Result<u32, PredictError> {
    let count = match unit {
        Unit::Int(n) => n,
        Unit::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| PredictError::Malformed(format!("branch count {s:?} is not a number")))?,
        Unit::List(_) => {
            return Err(PredictError::Malformed("branch count is a list".to_string()));
        }
    };

    u32::try_from(count)
        .ok()
        .filter(|c| *c >= 1)
        .ok_or_else(|| PredictError::Malformed(format!("invalid branch count {count}")))
}
