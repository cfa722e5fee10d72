// streamsink-core/src/schema.rs
// Event encoding and routing seams used by `EventSink`

use std::marker::PhantomData;

use serde::Serialize;

use crate::error::Result;

/// Turns a user event into the bytes stored in the stream
pub trait SerializationSchema<T>: Send {
    fn serialize(&self, event: &T) -> Result<Vec<u8>>;
}

/// Extracts the routing key that decides the event's partition
pub trait EventRouter<T>: Send {
    fn routing_key(&self, event: &T) -> String;
}

/// JSON encoding through serde
pub struct JsonSchema<T> {
    _marker: PhantomData<fn(&T)>,
}

impl<T> JsonSchema<T> {
    pub fn new() -> Self {
        JsonSchema {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> SerializationSchema<T> for JsonSchema<T> {
    fn serialize(&self, event: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(event)?)
    }
}

/// Events that already are bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSchema;

impl SerializationSchema<Vec<u8>> for BytesSchema {
    fn serialize(&self, event: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(event.clone())
    }
}

impl SerializationSchema<String> for BytesSchema {
    fn serialize(&self, event: &String) -> Result<Vec<u8>> {
        Ok(event.as_bytes().to_vec())
    }
}

/// Routes every event with the same key
#[derive(Debug, Clone)]
pub struct FixedRouter(pub String);

impl<T> EventRouter<T> for FixedRouter {
    fn routing_key(&self, _event: &T) -> String {
        self.0.clone()
    }
}

/// Routes with a closure
pub struct FnRouter<F>(pub F);

impl<T, F> EventRouter<T> for FnRouter<F>
where
    F: Fn(&T) -> String + Send,
{
    fn routing_key(&self, event: &T) -> String {
        (self.0)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Reading {
        sensor: String,
        value: i64,
    }

    #[test]
    fn test_json_schema() {
        let schema = JsonSchema::<Reading>::new();
        let bytes = schema
            .serialize(&Reading {
                sensor: "s1".to_string(),
                value: 7,
            })
            .unwrap();
        assert_eq!(bytes, br#"{"sensor":"s1","value":7}"#.to_vec());
    }

    #[test]
    fn test_routers() {
        let reading = Reading {
            sensor: "s9".to_string(),
            value: 1,
        };

        let fixed = FixedRouter("all".to_string());
        assert_eq!(EventRouter::<Reading>::routing_key(&fixed, &reading), "all");

        let by_sensor = FnRouter(|r: &Reading| r.sensor.clone());
        assert_eq!(by_sensor.routing_key(&reading), "s9");
    }

    #[test]
    fn test_bytes_schema() {
        assert_eq!(
            SerializationSchema::<String>::serialize(&BytesSchema, &"abc".to_string()).unwrap(),
            b"abc".to_vec()
        );
    }
}
