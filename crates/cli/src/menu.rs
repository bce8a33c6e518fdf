//! Interactive menu driving one session
//!
//! Each round picks a tree source, learns or loads a tree, then prints it
//! or predicts with it. Negative outcomes send the operator back to the
//! source choice on the same connection.

use std::io::{self, BufRead, Write};

use libregtree::channel::Transport;
use libregtree::{LearnOutcome, Listing, LoadOutcome, Session, SessionError};
use thiserror::Error;
use tracing::info;

use crate::console::Console;

/// How an interactive session ended without a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Operator chose not to continue
    Finished,
    /// Operator input ran out
    InputClosed,
    /// Server could not process the training data
    DataError,
}

#[derive(Debug, Error)]
pub enum MenuError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("console I/O failed: {0}")]
    Console(#[from] io::Error),
}

enum Round {
    Again,
    End(SessionEnd),
}

/// Run menu rounds until the operator quits or the session fails
pub fn run<T, R, W>(
    session: &mut Session<T>,
    console: &mut Console<R, W>,
) -> Result<SessionEnd, MenuError>
where
    T: Transport,
    R: BufRead,
    W: Write,
{
    loop {
        if let Round::End(end) = round(session, console)? {
            info!(?end, "Session over");
            return Ok(end);
        }

        console.say("")?;
        console.prompt("Continue? (y/n) ")?;
        match console.read_yes_no()? {
            Some(true) => continue,
            Some(false) => return Ok(SessionEnd::Finished),
            None => return Ok(SessionEnd::InputClosed),
        }
    }
}

fn round<T, R, W>(session: &mut Session<T>, console: &mut Console<R, W>) -> Result<Round, MenuError>
where
    T: Transport,
    R: BufRead,
    W: Write,
{
    let source = loop {
        let choice = console.choose(&[
            "Learn the tree from the database",
            "Load the tree from the archive",
        ])?;
        let picked = match choice {
            None => return Ok(Round::End(SessionEnd::InputClosed)),
            Some(1) => learn(session, console)?,
            Some(_) => load(session, console)?,
        };
        match picked {
            Picked::Ready(name) => break name,
            Picked::Retry => continue,
            Picked::End(end) => return Ok(Round::End(end)),
        }
    };

    match console.choose(&["Print the regression tree", "Predict with the regression tree"])? {
        None => Ok(Round::End(SessionEnd::InputClosed)),
        Some(1) => {
            let text = session.render_tree()?;
            console.say(&format!("\nRegression tree of '{source}':"))?;
            console.say(&text)?;
            Ok(Round::Again)
        }
        Some(_) => {
            console.say(&format!("\nPrediction with the regression tree of '{source}'."))?;
            let prediction = session.predict(console)?;
            console.say(&format!("Predicted value: {}.", prediction.value))?;
            Ok(Round::Again)
        }
    }
}

enum Picked {
    Ready(String),
    Retry,
    End(SessionEnd),
}

fn learn<T, R, W>(session: &mut Session<T>, console: &mut Console<R, W>) -> Result<Picked, MenuError>
where
    T: Transport,
    R: BufRead,
    W: Write,
{
    let tables = session.list_tables()?;
    let Some(table) = pick_name(console, &tables, "table", "There are no tables in the database.")?
    else {
        return Ok(if tables.is_empty() {
            Picked::Retry
        } else {
            Picked::End(SessionEnd::InputClosed)
        });
    };

    console.say("\nLearning the tree...")?;
    match session.learn_from_table(&table)? {
        LearnOutcome::Learned => {
            console.say("Training set learned.")?;
            Ok(Picked::Ready(table))
        }
        LearnOutcome::TableNotFound => {
            console.say("The table was not found.")?;
            Ok(Picked::Retry)
        }
        LearnOutcome::DataError => {
            console.say("The server could not process the training set.")?;
            Ok(Picked::End(SessionEnd::DataError))
        }
    }
}

fn load<T, R, W>(session: &mut Session<T>, console: &mut Console<R, W>) -> Result<Picked, MenuError>
where
    T: Transport,
    R: BufRead,
    W: Write,
{
    let files = session.list_files()?;
    let Some(file) = pick_name(console, &files, "file", "There are no files in the archive.")? else {
        return Ok(if files.is_empty() {
            Picked::Retry
        } else {
            Picked::End(SessionEnd::InputClosed)
        });
    };

    console.say("\nLoading the tree...")?;
    match session.load_from_file(&file)? {
        LoadOutcome::Loaded => {
            console.say("Tree loaded.")?;
            Ok(Picked::Ready(file))
        }
        LoadOutcome::FileNotFound => {
            console.say("The file was not found.")?;
            Ok(Picked::Retry)
        }
    }
}

/// Ask for a name until it is one of the listed candidates.
///
/// Returns `None` for an empty listing (after telling the operator) or when
/// input runs out.
fn pick_name<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    listing: &Listing,
    what: &str,
    empty_notice: &str,
) -> io::Result<Option<String>> {
    let Listing::Items(names) = listing else {
        console.say(empty_notice)?;
        return Ok(None);
    };

    console.say(&format!("\nAvailable {what}s: {}", names.join(", ")))?;
    loop {
        console.prompt(&format!("Enter the {what} name: "))?;
        match console.read_string()? {
            None => return Ok(None),
            Some(name) if listing.contains(&name) => return Ok(Some(name)),
            Some(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use libregtree::codec::{read_unit, write_unit};
    use libregtree::{ChannelOptions, Unit};

    enum Step {
        Expect(Unit),
        Reply(Unit),
        Hangup,
    }

    use Step::{Expect, Hangup, Reply};

    fn text(s: &str) -> Unit {
        Unit::text(s)
    }

    fn names(items: &[&str]) -> Unit {
        Unit::List(items.iter().map(|s| s.to_string()).collect())
    }

    /// Serve one connection, checking every client unit against the script
    fn scripted_server(steps: Vec<Step>) -> (u16, JoinHandle<Result<(), String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().map_err(|e| e.to_string())?;
            let mut writer = stream.try_clone().map_err(|e| e.to_string())?;
            let mut reader = BufReader::new(stream);
            for (i, step) in steps.into_iter().enumerate() {
                match step {
                    Expect(want) => {
                        let got = read_unit(&mut reader).map_err(|e| format!("step {i}: {e}"))?;
                        if got != want {
                            return Err(format!("step {i}: expected {want:?}, got {got:?}"));
                        }
                    }
                    Reply(unit) => write_unit(&mut writer, &unit).map_err(|e| e.to_string())?,
                    Hangup => return Ok(()),
                }
            }
            // Nothing else may arrive before the client hangs up
            match read_unit(&mut reader) {
                Ok(extra) => Err(format!("unexpected trailing unit {extra:?}")),
                Err(_) => Ok(()),
            }
        });
        (port, handle)
    }

    fn play(steps: Vec<Step>, input: &str) -> (Result<SessionEnd, MenuError>, String) {
        let (port, server) = scripted_server(steps);
        let options = ChannelOptions {
            read_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let mut session = Session::connect("127.0.0.1", port, &options, None).unwrap();
        let mut console = Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new());

        let result = run(&mut session, &mut console);
        session.close().unwrap();
        server.join().unwrap().unwrap();

        let output = String::from_utf8(console.into_output()).unwrap();
        (result, output)
    }

    #[test]
    fn learn_and_predict() {
        let steps = vec![
            Expect(Unit::Int(1)),
            Reply(names(&["sales", "iris"])),
            Expect(Unit::Int(3)),
            Expect(text("sales")),
            Reply(text("ok")),
            Expect(Unit::Int(6)),
            Reply(text("QUERY")),
            Reply(text("age <= 30?")),
            Reply(Unit::Int(2)),
            Expect(Unit::Int(0)),
            Reply(text("OK")),
            Reply(text("42.5")),
        ];
        // "nope" is not listed, 5 is not a branch: neither reaches the server
        let (result, output) = play(steps, "1\nnope\nsales\n2\n5\n0\nn\n");

        assert_eq!(result.unwrap(), SessionEnd::Finished);
        assert!(output.contains("Available tables: sales, iris"));
        assert!(output.contains("age <= 30?"));
        assert!(output.contains("5 is not a branch"));
        assert!(output.contains("Predicted value: 42.5."));
    }

    #[test]
    fn missing_file_returns_to_source_choice() {
        let steps = vec![
            Expect(Unit::Int(2)),
            Reply(names(&["missing.tree", "sales.dmp"])),
            Expect(Unit::Int(4)),
            Expect(text("missing.tree")),
            Reply(text("fileNotFound")),
            Expect(Unit::Int(2)),
            Reply(names(&["sales.dmp"])),
            Expect(Unit::Int(4)),
            Expect(text("sales.dmp")),
            Reply(text("ok")),
            Expect(Unit::Int(5)),
            Reply(text("[split] age <= 30?\n  [leaf] 42.5")),
        ];
        let (result, output) = play(steps, "2\nmissing.tree\n2\nsales.dmp\n1\nn\n");

        assert_eq!(result.unwrap(), SessionEnd::Finished);
        assert!(output.contains("The file was not found."));
        assert!(output.contains("Regression tree of 'sales.dmp':"));
        assert!(output.contains("  [leaf] 42.5"));
    }

    #[test]
    fn empty_database_goes_back_to_menu() {
        let steps = vec![
            Expect(Unit::Int(1)),
            Reply(text("NoTablesFound")),
            Expect(Unit::Int(2)),
            Reply(names(&["NoFilesFound"])),
        ];
        let (result, output) = play(steps, "1\n2\n");

        assert_eq!(result.unwrap(), SessionEnd::InputClosed);
        assert!(output.contains("There are no tables in the database."));
        assert!(output.contains("There are no files in the archive."));
    }

    #[test]
    fn data_error_ends_session() {
        let steps = vec![
            Expect(Unit::Int(1)),
            Reply(names(&["broken"])),
            Expect(Unit::Int(3)),
            Expect(text("broken")),
            Reply(text("dataError")),
        ];
        let (result, output) = play(steps, "1\nbroken\n");

        assert_eq!(result.unwrap(), SessionEnd::DataError);
        assert!(output.contains("could not process the training set"));
    }

    #[test]
    fn several_rounds_on_one_connection() {
        let steps = vec![
            Expect(Unit::Int(1)),
            Reply(names(&["sales"])),
            Expect(Unit::Int(3)),
            Expect(text("sales")),
            Reply(text("ok")),
            Expect(Unit::Int(5)),
            Reply(text("tree one")),
            Expect(Unit::Int(2)),
            Reply(names(&["a.dmp"])),
            Expect(Unit::Int(4)),
            Expect(text("a.dmp")),
            Reply(text("ok")),
            Expect(Unit::Int(5)),
            Reply(text("tree two")),
        ];
        let (result, output) = play(steps, "1\nsales\n1\ny\n2\na.dmp\n1\nN\n");

        assert_eq!(result.unwrap(), SessionEnd::Finished);
        assert!(output.contains("tree one"));
        assert!(output.contains("tree two"));
    }

    #[test]
    fn server_hangup_is_fatal() {
        let (result, _) = play(vec![Expect(Unit::Int(1)), Hangup], "1\n");
        assert!(matches!(result, Err(MenuError::Session(_))));
    }
}
