use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Global,
    Peer(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Signup,
    Login(String),
    Peers { online_only: bool, query: String },
    Open(Target),
    Close,
    Send(String),
    Image(String),
    Name(String),
    Whoami,
    Logout,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command /{0}, try /help")]
    Unknown(String),
}

pub const HELP: &str = "\
/signup                  create a new anonymous identity
/login <secret-key>      sign in with a secret key
/peers [--online] [q]    list peers, optionally filtered
/open <peer|global>      open a conversation
/close                   stop following the open conversation
/image <url>             send an image reference
/name <display name>     change your display name
/whoami                  show the current identity
/logout                  end the session
/quit                    exit
anything else is sent to the open conversation";

/// Parses one input line. Lines without a leading `/` are message text.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    match name {
        "signup" => Ok(Command::Signup),
        "login" if !args.is_empty() => Ok(Command::Login(args.to_string())),
        "login" => Err(CommandError::Usage("/login <secret-key>")),
        "peers" => {
            let mut online_only = false;
            let mut query = Vec::new();
            for word in args.split_whitespace() {
                if word == "--online" {
                    online_only = true;
                } else {
                    query.push(word);
                }
            }
            Ok(Command::Peers {
                online_only,
                query: query.join(" "),
            })
        }
        "open" if args.eq_ignore_ascii_case("global") => Ok(Command::Open(Target::Global)),
        "open" if !args.is_empty() => Ok(Command::Open(Target::Peer(args.to_string()))),
        "open" => Err(CommandError::Usage("/open <peer|global>")),
        "close" => Ok(Command::Close),
        "image" if !args.is_empty() => Ok(Command::Image(args.to_string())),
        "image" => Err(CommandError::Usage("/image <url>")),
        "name" if !args.is_empty() => Ok(Command::Name(args.to_string())),
        "name" => Err(CommandError::Usage("/name <display name>")),
        "whoami" => Ok(Command::Whoami),
        "logout" => Ok(Command::Logout),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}
