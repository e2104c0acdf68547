//
// Copyright 2025 Tabs Data Inc.
//

use tokio::select;
use tracing::info;

/// Termination signal received by the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
    Quit,
}

/// Waits for a termination signal. This method is platform-specific, returning the
/// received signal, or None if the monitor ended.
pub async fn terminate() -> Option<Termination> {
    #[cfg(not(windows))]
    // https://www.gnu.org/software/libc/manual/html_node/Termination-Signals.html
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut signal_interrupt_handle = signal(SignalKind::interrupt()).unwrap();
        let mut signal_terminate_handle = signal(SignalKind::terminate()).unwrap();
        let mut signal_quit_handle = signal(SignalKind::quit()).unwrap();

        select! {
            result = signal_interrupt_handle.recv() => {
                if result.is_some() {
                    info!("Received SIGINT (Ctrl+C). Initiating graceful stop...");
                    Some(Termination::Interrupt)
                } else {
                    info!("SIGINT (Ctrl+C) monitor ended.");
                    None
                }
            },
            result = signal_terminate_handle.recv() => {
                if result.is_some() {
                    info!("Received SIGTERM. Initiating graceful stop...");
                    Some(Termination::Terminate)
                } else {
                    info!("SIGTERM monitor finished.");
                    None
                }
            },
            result = signal_quit_handle.recv() => {
                if result.is_some() {
                    info!("Received SIGQUIT. Initiating forceful stop...");
                    Some(Termination::Quit)
                } else {
                    info!("SIGQUIT monitor finished.");
                    None
                }
            },
        }
    }

    #[cfg(windows)]
    // https://learn.microsoft.com/en-us/windows/console/handlerroutine
    {
        use tokio::signal::windows;

        let mut signal_c_handle = windows::ctrl_c().unwrap();
        let mut signal_break_handle = windows::ctrl_break().unwrap();
        let mut signal_shutdown_handle = windows::ctrl_shutdown().unwrap();

        select! {
            result = signal_c_handle.recv() => {
                if result.is_some() {
                    info!("Received Ctrl+C. Initiating graceful stop...");
                    Some(Termination::Interrupt)
                } else {
                    info!("Ctrl+C monitor ended.");
                    None
                }
            },
            result = signal_break_handle.recv() => {
                if result.is_some() {
                    info!("Received Ctrl+Break. Initiating graceful stop...");
                    Some(Termination::Terminate)
                } else {
                    info!("Ctrl+Break monitor ended.");
                    None
                }
            },
            result = signal_shutdown_handle.recv() => {
                if result.is_some() {
                    info!("Received Ctrl+Shutdown. Initiating graceful stop...");
                    Some(Termination::Quit)
                } else {
                    info!("Ctrl+Shutdown monitor ended.");
                    None
                }
            },
        }
    }
}
