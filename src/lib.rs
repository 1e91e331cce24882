// pilotty - a PTY control server for driving interactive terminal
// applications on behalf of an automated client.
//
// The core lives in this library so the binary, the integration tests,
// and any alternative front end share the same components:
//
//   keys     - symbolic key name -> VT byte sequence
//   grid     - fixed character matrix + cursor
//   ansi     - ANSI/CSI interpreter feeding the grid
//   ring     - bounded raw-output byte log
//   events   - tagged session events + fan-out bus
//   session  - one child process under a PTY
//   registry - id allocation, lookup, kill, event tagging
//   live     - debounced screen mirror (stderr / file)
//   server   - remote operations, focus chain, request log

pub mod ansi;
pub mod error;
pub mod events;
pub mod grid;
pub mod keys;
pub mod live;
pub mod registry;
pub mod ring;
pub mod server;
pub mod session;
