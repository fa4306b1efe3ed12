use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::future::Future;

/// What should we do when the user stops this program?
///
/// The first SIGINT or SIGTERM resolves the returned future so the API
/// server and the background loops can wind down. A second one exits
/// immediately.
pub fn handle_shutdown() -> std::io::Result<impl Future<Output = ()> + Send + 'static> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let (tx, rx) = tokio::sync::oneshot::channel::<i32>();

    std::thread::spawn(move || {
        let mut tx = Some(tx);
        for signal in signals.forever() {
            match tx.take() {
                Some(tx) => {
                    log::info!("Received signal {signal}, shutting down");
                    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
                    let _ = tx.send(signal);
                }
                None => {
                    log::warn!("Received signal {signal} again, exiting now");
                    std::process::exit(1);
                }
            }
        }
    });

    Ok(async move {
        // A dropped sender means the signal thread is gone; nothing left to wait for.
        let _ = rx.await;
    })
}
