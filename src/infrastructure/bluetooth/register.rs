//! Register Client
//!
//! Drives the I2C bridge of a sensor node through its catalog attributes:
//! the target device address, register, transfer length and value are plain
//! characteristics written in that order.

use crate::domain::catalog::names;
use crate::domain::models::DeviceAddress;
use crate::error::{GatewayError, Result};
use crate::infrastructure::bluetooth::service::LinkLayerController;

/// Register access on one connected node.
pub struct RegisterClient<'a> {
    controller: &'a mut LinkLayerController,
    node: DeviceAddress,
}

impl<'a> RegisterClient<'a> {
    pub fn new(controller: &'a mut LinkLayerController, node: DeviceAddress) -> Self {
        Self { controller, node }
    }

    async fn select(&mut self, device: u8, register: u8, len: usize) -> Result<()> {
        let len = u8::try_from(len).map_err(|_| {
            GatewayError::NotReady(format!("register transfer of {} bytes is too long", len))
        })?;
        self.controller
            .write_attribute(&self.node, names::I2C_CHAR_DEVICE_ADDRESS, &[device])
            .await?;
        self.controller
            .write_attribute(&self.node, names::I2C_CHAR_DEVICE_REGISTER, &[register])
            .await?;
        self.controller
            .write_attribute(&self.node, names::I2C_CHAR_READ_LENGTH, &[len])
            .await
    }

    pub async fn write_register(&mut self, device: u8, register: u8, bytes: &[u8]) -> Result<()> {
        self.select(device, register, bytes.len()).await?;
        self.controller
            .write_attribute(&self.node, names::I2C_CHAR_VALUE, bytes)
            .await
    }

    pub async fn read_register(&mut self, device: u8, register: u8, len: usize) -> Result<Vec<u8>> {
        self.select(device, register, len).await?;
        self.controller
            .read_attribute(&self.node, names::I2C_CHAR_VALUE)
            .await
    }
}
