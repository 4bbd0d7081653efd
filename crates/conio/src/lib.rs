pub mod line;
pub mod telnet;

pub use line::ConsoleReader;
pub use line::ConsoleWriter;
pub use telnet::IacFilter;
