// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

/// Runs one protocol operation against a pooled connection under the
/// client's retry schedule.
///
/// Each round acquires a connection (retrying failed dials), clears the
/// guard's health bit, and evaluates `$op`. On success the bit is restored
/// and the connection re-enters the pool. On a resumable error the bit is
/// restored but the error is surfaced without retrying — the server already
/// answered. On anything else the connection is destroyed and the operation
/// retried until the schedule runs dry. Because the health bit is cleared
/// for the duration of `$op`, cancelling the returned future mid-operation
/// also destroys the connection rather than recycling a half-read stream.
macro_rules! execute_with_retry {
    ($pool:expr, $retry:expr, $conn:ident => $op:expr) => {{
        let mut pauses = $retry.intervals();
        loop {
            let mut $conn = match $pool.acquire().await {
                Ok(conn) => conn,
                Err(err) => match pauses.next() {
                    Some(pause) => {
                        tracing::debug!(error = %err, "acquire failed, retrying");
                        tokio::time::sleep(pause).await;
                        continue;
                    }
                    None => break Err(err),
                },
            };
            $conn.set_healthy(false);
            match $op {
                Ok(value) => {
                    $conn.set_healthy(true);
                    break Ok(value);
                }
                Err(err) => {
                    let resumable = err.is_resumable();
                    $conn.set_healthy(resumable);
                    drop($conn);
                    if resumable {
                        break Err(err);
                    }
                    match pauses.next() {
                        Some(pause) => {
                            tracing::debug!(error = %err, "connection failed, retrying");
                            tokio::time::sleep(pause).await;
                        }
                        None => break Err(err),
                    }
                }
            }
        }
    }};
}
