mod support;

mod dispatch;
mod reload;
mod snapshots;
