//! Per-method handlers and the standard scripted ones.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use facet::Facet;
use parking_lot::Mutex;
use rowstream_core::{Responder, RpcError};
use rowstream_protocol::{
    ExecuteQueryRequest, ExecuteQueryResponse, ReadRowsRequest, ReadRowsResponse, Status,
};

use crate::{ExecuteQueryAction, ReadRowsAction, Recorder, RequestRecord};

/// Failures of a script, as opposed to failures it was told to produce.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    /// More calls arrived than actions were registered.
    #[error("{method}: call #{call} arrived but only {registered} actions were registered")]
    ActionsExhausted {
        method: &'static str,
        call: usize,
        registered: usize,
    },
    /// The client went away while the action was being played.
    #[error("{method}: client disconnected during playback: {source}")]
    Disconnected {
        method: &'static str,
        #[source]
        source: RpcError,
    },
}

/// Typed view of a [`Responder`] handed to handlers.
pub struct ResponseSink<Resp> {
    responder: Arc<Responder>,
    _marker: PhantomData<fn(Resp)>,
}

impl<Resp> Clone for ResponseSink<Resp> {
    fn clone(&self) -> Self {
        Self {
            responder: self.responder.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Resp: Facet<'static>> ResponseSink<Resp> {
    pub(crate) fn new(responder: Arc<Responder>) -> Self {
        Self {
            responder,
            _marker: PhantomData,
        }
    }

    /// Write one response message to the client.
    pub async fn send(&self, message: &Resp) -> Result<(), RpcError> {
        self.responder.send(message).await
    }
}

/// Future returned by a handler: the status that ends the stream.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Status, ScriptError>> + Send>>;

/// A method handler. The server ends the stream with the returned status,
/// or with `INTERNAL` on a [`ScriptError`].
pub type Handler<Req, Resp> =
    Arc<dyn Fn(RequestRecord<Req>, ResponseSink<Resp>) -> HandlerFuture + Send + Sync>;

pub type ReadRowsHandler = Handler<ReadRowsRequest, ReadRowsResponse>;
pub type ExecuteQueryHandler = Handler<ExecuteQueryRequest, ExecuteQueryResponse>;

/// Box a closure as a [`Handler`].
pub fn handler<Req, Resp, F, Fut>(f: F) -> Handler<Req, Resp>
where
    F: Fn(RequestRecord<Req>, ResponseSink<Resp>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Status, ScriptError>> + Send + 'static,
{
    Arc::new(move |record, sink| Box::pin(f(record, sink)))
}

/// Actions plus which of them have been played.
struct Script<A> {
    method: &'static str,
    actions: Vec<A>,
    cursor: Mutex<Cursor>,
}

struct Cursor {
    calls: usize,
    played: Vec<bool>,
}

impl<A: Clone> Script<A> {
    fn new(method: &'static str, actions: Vec<A>) -> Self {
        let played = vec![false; actions.len()];
        Self {
            method,
            actions,
            cursor: Mutex::new(Cursor { calls: 0, played }),
        }
    }

    fn exhausted(&self, call: usize) -> ScriptError {
        ScriptError::ActionsExhausted {
            method: self.method,
            call,
            registered: self.actions.len(),
        }
    }

    fn disconnected(&self, source: RpcError) -> ScriptError {
        ScriptError::Disconnected {
            method: self.method,
            source,
        }
    }

    /// The action for the next call.
    ///
    /// With several actions, the first unplayed one `wanted` accepts is
    /// chosen; otherwise the first unplayed one in registration order.
    fn take(&self, wanted: impl Fn(&A) -> bool) -> Result<Option<A>, ScriptError> {
        let mut cursor = self.cursor.lock();
        let call = cursor.calls;
        cursor.calls += 1;
        match self.actions.len() {
            0 => return Ok(None),
            1 => return Ok(self.actions.first().cloned()),
            _ => {}
        }

        let played = &cursor.played;
        let unplayed = self
            .actions
            .iter()
            .enumerate()
            .filter(|(i, _)| !played[*i]);
        let index = unplayed
            .clone()
            .find(|(_, action)| wanted(*action))
            .or_else(|| unplayed.clone().next())
            .map(|(i, _)| i)
            .ok_or_else(|| self.exhausted(call))?;
        cursor.played[index] = true;
        Ok(self.actions.get(index).cloned())
    }

    /// Consecutive actions from the first unplayed one up to and including
    /// the first one `ends` accepts.
    fn take_until(&self, ends: impl Fn(&A) -> bool) -> Result<Vec<A>, ScriptError> {
        if self.actions.len() <= 1 {
            return Ok(self.actions.clone());
        }
        let mut cursor = self.cursor.lock();
        let call = cursor.calls;
        cursor.calls += 1;
        let Some(start) = cursor.played.iter().position(|played| !played) else {
            return Err(self.exhausted(call));
        };

        let mut batch = Vec::new();
        for (index, action) in self.actions.iter().enumerate().skip(start) {
            if cursor.played[index] {
                break;
            }
            cursor.played[index] = true;
            batch.push(action.clone());
            if ends(action) {
                break;
            }
        }
        Ok(batch)
    }
}

/// Standard `ReadRows` handler: records every call, then plays an action.
///
/// An action whose first row key is among the requested keys is preferred,
/// so concurrent point reads each get their own row whatever their arrival
/// order. Other calls take actions in registration order.
pub fn scripted_read_rows(
    recorder: Recorder<ReadRowsRequest>,
    actions: Vec<ReadRowsAction>,
) -> ReadRowsHandler {
    let script = Arc::new(Script::new("ReadRows", actions));
    handler(move |record: RequestRecord<ReadRowsRequest>, sink: ResponseSink<ReadRowsResponse>| {
        let script = script.clone();
        let recorder = recorder.clone();
        async move {
            let requested = record.request.rows.row_keys.clone();
            recorder.push(record);
            let Some(action) = script.take(|action: &ReadRowsAction| {
                action
                    .first_row_key()
                    .is_some_and(|key| requested.iter().any(|k| k.as_slice() == key))
            })?
            else {
                return Ok(Status::ok());
            };

            if let Some(delay) = action.delay {
                tokio::time::sleep(delay).await;
            }
            for message in action.messages() {
                sink.send(&message)
                    .await
                    .map_err(|source| script.disconnected(source))?;
            }
            Ok(action.status)
        }
    })
}

/// Standard `ExecuteQuery` handler.
///
/// Each call streams consecutive actions until one marked `end_of_stream`
/// (or the last registered action). A non-OK action status ends the call
/// early with that status.
pub fn scripted_execute_query(
    recorder: Recorder<ExecuteQueryRequest>,
    actions: Vec<ExecuteQueryAction>,
) -> ExecuteQueryHandler {
    let script = Arc::new(Script::new("ExecuteQuery", actions));
    handler(move |record, sink: ResponseSink<ExecuteQueryResponse>| {
        let script = script.clone();
        let recorder = recorder.clone();
        async move {
            recorder.push(record);
            let batch = script.take_until(|action: &ExecuteQueryAction| action.end_of_stream)?;

            let mut status = Status::ok();
            for action in batch {
                if let Some(delay) = action.delay {
                    tokio::time::sleep(delay).await;
                }
                for fragment in &action.fragments {
                    sink.send(&fragment.to_response())
                        .await
                        .map_err(|source| script.disconnected(source))?;
                }
                status = action.status;
                if !status.is_ok() {
                    break;
                }
            }
            Ok(status)
        }
    })
}
