//! Recording in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use canopen_browser::{
    AccessType, Bound, BusSettings, CanTransport, CompositeKind, CompositeObject, ObjectDictionary,
    ScalarObject, TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(BusSettings),
    Disconnect(u32),
    Upload {
        handle: u32,
        node_id: u8,
        index: u16,
        subindex: u8,
    },
    Download {
        handle: u32,
        node_id: u8,
        index: u16,
        subindex: u8,
        data: Vec<u8>,
    },
}

#[derive(Debug)]
pub struct MockHandle {
    pub id: u32,
}

/// Transport that records every call and serves values from a map
#[derive(Debug, Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU32,
    values: Mutex<HashMap<(u16, u8), Vec<u8>>>,
    connect_error: Mutex<Option<TransportError>>,
    disconnect_error: Mutex<Option<TransportError>>,
    transfer_error: Mutex<Option<TransportError>>,
    delay: Mutex<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, index: u16, subindex: u8, data: &[u8]) -> Self {
        self.values.lock().unwrap().insert((index, subindex), data.to_vec());
        self
    }

    pub fn fail_next_connect(&self, error: TransportError) {
        *self.connect_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_disconnect(&self, error: TransportError) {
        *self.disconnect_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_transfer(&self, error: TransportError) {
        *self.transfer_error.lock().unwrap() = Some(error);
    }

    /// Time each SDO transfer takes
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn value(&self, index: u16, subindex: u8) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(&(index, subindex)).cloned()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn simulate_transfer(&self) -> Result<(), TransportError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.transfer_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CanTransport for MockTransport {
    type Handle = MockHandle;

    async fn connect(&self, settings: &BusSettings) -> Result<MockHandle, TransportError> {
        self.record(Call::Connect(settings.clone()));
        if let Some(error) = self.connect_error.lock().unwrap().take() {
            return Err(error);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockHandle { id })
    }

    async fn disconnect(&self, handle: MockHandle) -> Result<(), TransportError> {
        self.record(Call::Disconnect(handle.id));
        match self.disconnect_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn sdo_upload(
        &self,
        handle: &MockHandle,
        node_id: u8,
        index: u16,
        subindex: u8,
    ) -> Result<Vec<u8>, TransportError> {
        self.record(Call::Upload {
            handle: handle.id,
            node_id,
            index,
            subindex,
        });
        self.simulate_transfer().await?;
        // Object does not exist in the object dictionary
        self.value(index, subindex)
            .ok_or(TransportError::Abort { code: 0x0602_0000 })
    }

    async fn sdo_download(
        &self,
        handle: &MockHandle,
        node_id: u8,
        index: u16,
        subindex: u8,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.record(Call::Download {
            handle: handle.id,
            node_id,
            index,
            subindex,
            data: data.to_vec(),
        });
        self.simulate_transfer().await?;
        self.values.lock().unwrap().insert((index, subindex), data.to_vec());
        Ok(())
    }
}

/// Identity record 0x1018 (subindices 1-4), read-only UNSIGNED32 at 0x6000,
/// read-write INTEGER16 at 0x2000 and a write-only command at 0x2001
pub fn test_dictionary() -> ObjectDictionary {
    let mut od = ObjectDictionary::new();

    let mut identity = CompositeObject::new(0x1018, "Identity", CompositeKind::Record);
    for (subindex, name) in [(1, "Vendor-ID"), (2, "Product code"), (3, "Revision number"), (4, "Serial number")] {
        identity
            .add_member(
                ScalarObject::new(0x1018, subindex, name)
                    .with_data_type(0x07)
                    .with_access(AccessType::ReadOnly),
            )
            .unwrap();
    }
    od.add_object(identity).unwrap();

    od.add_object(
        ScalarObject::new(0x6000, 0, "Read inputs")
            .with_data_type(0x07)
            .with_access(AccessType::ReadOnly),
    )
    .unwrap();
    od.add_object(
        ScalarObject::new(0x2000, 0, "Setpoint")
            .with_data_type(0x03)
            .with_access(AccessType::ReadWrite)
            .with_limits(Some(Bound::Signed(-100)), Some(Bound::Signed(100))),
    )
    .unwrap();
    od.add_object(
        ScalarObject::new(0x2001, 0, "Command")
            .with_data_type(0x05)
            .with_access(AccessType::WriteOnly),
    )
    .unwrap();
    od
}

pub const TEST_EDS: &str = "\
[DeviceInfo]
VendorName=Acme Automation
ProductName=IO Module 8DI

[DeviceComissioning]
NodeID=0x05
Baudrate=250

[1018]
ParameterName=Identity Object
ObjectType=0x9

[1018sub1]
ParameterName=Vendor-ID
DataType=0x0007
AccessType=ro

[1018sub2]
ParameterName=Product code
DataType=0x0007
AccessType=ro

[6000]
ParameterName=Read inputs
ObjectType=0x7
DataType=0x0007
AccessType=ro
";
