//! Frame streaming between a view server and a view client.

mod common;

use std::time::Duration;

use common::pair;
use remora::{
    Config, Context, Result,
    view::{Frame, GrabRequest, InputEvent, Rect, ViewEvent},
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

async fn next<T>(rx: &mut UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.ok().flatten()
}

async fn quiet<T>(rx: &mut UnboundedReceiver<T>) -> bool {
    tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err()
}

fn frame(width: i32) -> Frame {
    Frame {
        view_rect: Rect::new(0, 0, width, 10),
        ..Frame::default()
    }
}

#[tokio::test]
async fn test_one_frame_in_flight_under_change_storm() -> Result<()> {
    let (probe, client) = pair(Config::default()).await?;
    let probe = Context::new(probe);
    let client = Context::new(client);
    let (grabs, mut requests) = mpsc::unbounded_channel::<GrabRequest>();
    let (server, _input) = probe.serve_view("canvas", grabs).await?;
    let (viewer, mut frames) = client.view_client("canvas").await?;

    viewer.set_active(true)?;
    let request = next(&mut requests).await.expect("first grab");
    assert!(request.full);
    server.send_frame(frame(10))?;
    assert_eq!(next(&mut frames).await, Some(ViewEvent::Frame(frame(10))));

    for _ in 0..1000 {
        server.source_changed();
    }
    assert!(quiet(&mut requests).await);

    viewer.frame_displayed()?;
    assert!(next(&mut requests).await.is_some());
    assert!(quiet(&mut requests).await);
    assert_eq!(server.last_sent(), Some(Rect::new(0, 0, 10, 10)));
    Ok(())
}

#[tokio::test]
async fn test_viewport_reset_and_input() -> Result<()> {
    let (probe, client) = pair(Config::default()).await?;
    let probe = Context::new(probe);
    let client = Context::new(client);
    let (grabs, mut requests) = mpsc::unbounded_channel::<GrabRequest>();
    let (server, mut input) = probe.serve_view("canvas", grabs).await?;
    let (viewer, mut frames) = client.view_client("canvas").await?;

    viewer.set_active(true)?;
    next(&mut requests).await.expect("first grab");
    server.send_frame(frame(10))?;
    next(&mut frames).await;

    let viewport = Rect::new(2, 2, 5, 5);
    viewer.set_viewport(viewport)?;
    viewer.frame_displayed()?;
    let request = next(&mut requests).await.expect("grab for viewport");
    assert_eq!(request.region, Some(viewport));

    server.reset_view();
    server.send_frame(frame(5))?;
    assert_eq!(next(&mut frames).await, Some(ViewEvent::Reset));
    assert_eq!(next(&mut frames).await, Some(ViewEvent::Frame(frame(5))));

    let click = InputEvent::Mouse {
        action: remora::view::ButtonAction::Press,
        x: 3,
        y: 4,
        button: 1,
        buttons: 1,
        modifiers: 0,
    };
    viewer.send_input(&click)?;
    assert_eq!(next(&mut input).await, Some(click));
    Ok(())
}

#[tokio::test]
async fn test_inactive_view_is_not_grabbed() -> Result<()> {
    let (probe, client) = pair(Config::default()).await?;
    let probe = Context::new(probe);
    let client = Context::new(client);
    let (grabs, mut requests) = mpsc::unbounded_channel::<GrabRequest>();
    let (server, _input) = probe.serve_view("canvas", grabs).await?;
    let (viewer, _frames) = client.view_client("canvas").await?;

    server.source_changed();
    assert!(quiet(&mut requests).await);

    viewer.set_active(true)?;
    assert!(next(&mut requests).await.is_some());
    viewer.set_active(false)?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.is_active() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("deactivated");
    Ok(())
}
