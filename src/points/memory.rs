//! In-memory point backend for dry runs and tests.
//!
//! `MemoryPoints` holds a plain table of point values plus declarative
//! put-reactions ("when X is written, also set Y"), which is enough to make
//! device state machines (SSA power-up, RF mode switches, tuner motion)
//! resolve without real hardware. Every write is recorded so tests can
//! assert on exactly which hardware commands a sequence issued.

use std::collections::HashMap;
use std::future::{ready, Future};
use std::sync::Mutex;

use super::names::PointName;
use super::{PointAccess, PointError, PointValue};

/// What a reaction writes when its trigger point is put.
#[derive(Debug, Clone)]
pub enum ReactionValue {
    /// Set the target to a fixed value.
    Set(PointValue),
    /// Copy the value that was written to the trigger.
    CopyPut,
}

#[derive(Debug, Clone)]
struct PutReaction {
    trigger: PointName,
    target: PointName,
    value: ReactionValue,
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<PointName, PointValue>,
    reactions: Vec<PutReaction>,
    get_errors: HashMap<PointName, PointError>,
    put_errors: HashMap<PointName, PointError>,
    puts: Vec<(PointName, PointValue)>,
}

/// An in-memory [`PointAccess`] backend.
#[derive(Debug, Default)]
pub struct MemoryPoints {
    inner: Mutex<Inner>,
}

impl MemoryPoints {
    pub fn new() -> Self {
        MemoryPoints::default()
    }

    /// Seeds a point value without recording a put.
    pub fn set(&self, name: PointName, value: impl Into<PointValue>) {
        self.inner
            .lock()
            .unwrap()
            .values
            .insert(name, value.into());
    }

    /// Registers a reaction: whenever `trigger` is put, `target` is set.
    pub fn react(&self, trigger: PointName, target: PointName, value: ReactionValue) {
        self.inner.lock().unwrap().reactions.push(PutReaction {
            trigger,
            target,
            value,
        });
    }

    /// Scripts every subsequent `get` of `name` to fail with `error`.
    pub fn fail_get(&self, name: PointName, error: PointError) {
        self.inner.lock().unwrap().get_errors.insert(name, error);
    }

    /// Scripts every subsequent `put` to `name` to fail with `error`.
    pub fn fail_put(&self, name: PointName, error: PointError) {
        self.inner.lock().unwrap().put_errors.insert(name, error);
    }

    /// Current value of a point, if any.
    pub fn value(&self, name: &PointName) -> Option<PointValue> {
        self.inner.lock().unwrap().values.get(name).cloned()
    }

    /// Every recorded put, in order.
    pub fn puts(&self) -> Vec<(PointName, PointValue)> {
        self.inner.lock().unwrap().puts.clone()
    }

    /// The values written to one point, in order.
    pub fn puts_to(&self, name: &PointName) -> Vec<PointValue> {
        self.inner
            .lock()
            .unwrap()
            .puts
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Clears the recorded put log (values and reactions are kept).
    pub fn clear_puts(&self) {
        self.inner.lock().unwrap().puts.clear();
    }

    fn do_get(&self, name: &PointName) -> Result<PointValue, PointError> {
        let inner = self.inner.lock().unwrap();
        if let Some(err) = inner.get_errors.get(name) {
            return Err(err.clone());
        }
        inner
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| PointError::Disconnected {
                name: name.to_string(),
            })
    }

    fn do_put(&self, name: &PointName, value: PointValue) -> Result<(), PointError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.put_errors.get(name) {
            return Err(err.clone());
        }
        inner.puts.push((name.clone(), value.clone()));
        inner.values.insert(name.clone(), value.clone());
        let fired: Vec<(PointName, PointValue)> = inner
            .reactions
            .iter()
            .filter(|r| &r.trigger == name)
            .map(|r| {
                let v = match &r.value {
                    ReactionValue::Set(v) => v.clone(),
                    ReactionValue::CopyPut => value.clone(),
                };
                (r.target.clone(), v)
            })
            .collect();
        for (target, v) in fired {
            inner.values.insert(target, v);
        }
        Ok(())
    }
}

impl PointAccess for MemoryPoints {
    fn get(&self, name: &PointName) -> impl Future<Output = Result<PointValue, PointError>> + Send {
        ready(self.do_get(name))
    }

    fn put(
        &self,
        name: &PointName,
        value: PointValue,
        _wait: bool,
    ) -> impl Future<Output = Result<(), PointError>> + Send {
        ready(self.do_put(name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::PointAccessExt;

    fn name(s: &str) -> PointName {
        PointName::new(s)
    }

    #[tokio::test]
    async fn get_of_unseeded_point_is_disconnected() {
        let points = MemoryPoints::new();
        let err = points.get(&name("MISSING")).await.unwrap_err();
        assert!(matches!(err, PointError::Disconnected { .. }));
    }

    #[tokio::test]
    async fn puts_are_recorded_and_readable() {
        let points = MemoryPoints::new();
        points.put_f64(&name("ADES"), 5.0, true).await.unwrap();
        assert_eq!(points.get_f64(&name("ADES")).await.unwrap(), 5.0);
        assert_eq!(points.puts_to(&name("ADES")), vec![PointValue::Float(5.0)]);
    }

    #[tokio::test]
    async fn set_reaction_fires_on_put() {
        let points = MemoryPoints::new();
        points.react(
            name("PowerOn"),
            name("StatusMsg"),
            ReactionValue::Set(PointValue::Int(3)),
        );
        points.put_i64(&name("PowerOn"), 1, true).await.unwrap();
        assert_eq!(points.get_i64(&name("StatusMsg")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn copy_reaction_mirrors_the_written_value() {
        let points = MemoryPoints::new();
        points.react(name("RFCTRL"), name("RFSTATE"), ReactionValue::CopyPut);
        points.put_i64(&name("RFCTRL"), 1, true).await.unwrap();
        assert_eq!(points.get_i64(&name("RFSTATE")).await.unwrap(), 1);
        points.put_i64(&name("RFCTRL"), 0, true).await.unwrap();
        assert_eq!(points.get_i64(&name("RFSTATE")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scripted_errors_are_returned() {
        let points = MemoryPoints::new();
        points.set(name("HWMODE"), 0i64);
        points.fail_get(
            name("HWMODE"),
            PointError::Timeout {
                name: "HWMODE".to_string(),
            },
        );
        assert!(matches!(
            points.get(&name("HWMODE")).await,
            Err(PointError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn type_mismatch_names_the_point() {
        let points = MemoryPoints::new();
        points.set(name("WF"), vec![1.0, 2.0]);
        let err = points.get_f64(&name("WF")).await.unwrap_err();
        assert!(err.to_string().contains("WF"));
        assert!(matches!(err, PointError::TypeMismatch { .. }));
    }
}
