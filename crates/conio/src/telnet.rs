//! Telnet IAC stripping for a console *client*.
//!
//! The game console speaks plain text over a telnet port. Some server
//! builds still emit IAC negotiation on connect, which would otherwise
//! land in the middle of the first banner lines. This filter removes
//! IAC sequences (including `IAC SB ... IAC SE` subnegotiation blocks)
//! from the inbound stream.
//!
//! Negotiation is ignored by default: the console does not care whether
//! we answer, we only need the stream clean. Callers that do want to
//! refuse options explicitly can enable replies and flush them with
//! [`IacFilter::take_replies`].

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Subneg {
        iac_seen: bool,
    },
}

#[derive(Debug, Default)]
pub struct IacFilter {
    state: State,
    reply_refusals: bool,
    replies: Vec<u8>,
}

impl IacFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `IAC DO x` with `IAC WONT x` and `IAC WILL x` with
    /// `IAC DONT x` instead of staying silent.
    pub fn reply_refusals(mut self, on: bool) -> Self {
        self.reply_refusals = on;
        self
    }

    /// Strip IAC sequences from `chunk`, appending the surviving data
    /// bytes to `out`. Sequences split across chunks are handled.
    pub fn strip_into(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &b in chunk {
            match &mut self.state {
                State::Data => {
                    if b == IAC {
                        self.state = State::Iac;
                    } else {
                        out.push(b);
                    }
                }
                State::Iac => match b {
                    // IAC IAC escapes a literal 0xff.
                    IAC => {
                        out.push(IAC);
                        self.state = State::Data;
                    }
                    DO | DONT | WILL | WONT => {
                        self.state = State::Negotiate(b);
                    }
                    SB => {
                        self.state = State::Subneg { iac_seen: false };
                    }
                    // Two-byte commands (NOP, GA, ...) carry nothing.
                    _ => {
                        self.state = State::Data;
                    }
                },
                State::Negotiate(cmd) => {
                    if self.reply_refusals {
                        match *cmd {
                            DO => self.replies.extend_from_slice(&[IAC, WONT, b]),
                            WILL => self.replies.extend_from_slice(&[IAC, DONT, b]),
                            _ => {}
                        }
                    }
                    self.state = State::Data;
                }
                State::Subneg { iac_seen } => {
                    if *iac_seen {
                        if b == SE {
                            self.state = State::Data;
                        } else {
                            // IAC IAC inside SB is an escaped byte of the
                            // subnegotiation payload; we drop the payload
                            // anyway, so either way keep consuming.
                            *iac_seen = false;
                        }
                    } else if b == IAC {
                        *iac_seen = true;
                    }
                }
            }
        }
    }

    /// Drain any refusal replies accumulated since the last call.
    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(f: &mut IacFilter, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        f.strip_into(chunk, &mut out);
        out
    }

    #[test]
    fn passes_plain_data() {
        let mut f = IacFilter::new();
        assert_eq!(strip(&mut f, b"2026-01-01 INF hello\n"), b"2026-01-01 INF hello\n");
        assert!(f.take_replies().is_empty());
    }

    #[test]
    fn unescapes_doubled_iac() {
        let mut f = IacFilter::new();
        assert_eq!(strip(&mut f, &[255, 255, b'a']), vec![255, b'a']);
    }

    #[test]
    fn strips_negotiation_silently_by_default() {
        let mut f = IacFilter::new();
        let out = strip(&mut f, &[255, 253, 1, b'x', 255, 251, 3, b'y']);
        assert_eq!(out, vec![b'x', b'y']);
        assert!(f.take_replies().is_empty());
    }

    #[test]
    fn refuses_when_asked() {
        let mut f = IacFilter::new().reply_refusals(true);
        let out = strip(&mut f, &[255, 253, 1, 255, 251, 3]);
        assert!(out.is_empty());
        assert_eq!(f.take_replies(), vec![255, 252, 1, 255, 254, 3]);
    }

    #[test]
    fn handles_sequence_split_across_chunks() {
        let mut f = IacFilter::new();
        let out1 = strip(&mut f, &[b'a', 255]);
        assert_eq!(out1, vec![b'a']);
        let out2 = strip(&mut f, &[253]);
        assert!(out2.is_empty());
        let out3 = strip(&mut f, &[7, b'b']);
        assert_eq!(out3, vec![b'b']);
    }

    #[test]
    fn strips_subnegotiation_block() {
        let mut f = IacFilter::new();
        let bytes = [b'a', 255, 250, 24, b'x', b'y', 255, 240, b'b'];
        assert_eq!(strip(&mut f, &bytes), vec![b'a', b'b']);
    }
}
