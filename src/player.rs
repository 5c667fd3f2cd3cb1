use crate::error::{BluosError, Result};
use crate::executor::RequestExecutor;
use crate::protocol::{DeviceRequest, Endpoint};
use crate::types::{AudioInput, BluetoothMode, Device, Preset, QueueItem, StatusSnapshot, SyncStatus, Volume};
use crate::validate;
use crate::xml;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Interface for controlling one BluOS player
///
/// A `Player` provides typed methods for playback, volume, queue, inputs,
/// presets, grouping and maintenance. Every call goes through the shared
/// [`RequestExecutor`], so rate limiting and retry apply across all handles to
/// the same device.
#[derive(Clone)]
pub struct Player {
    device: Device,
    executor: RequestExecutor,
    timeout: Duration,
    safe_volume: Volume,
}

impl Player {
    pub fn new(device: Device, executor: RequestExecutor, timeout: Duration, safe_volume: Volume) -> Self {
        Self {
            device,
            executor,
            timeout,
            safe_volume,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn address(&self) -> Ipv4Addr {
        self.device.address
    }

    async fn send(&self, request: DeviceRequest) -> Result<Vec<u8>> {
        let response = self.executor.execute(&self.device, &request, self.timeout).await?;
        Ok(response.body)
    }

    async fn command(&self, request: DeviceRequest) -> Result<()> {
        self.send(request).await.map(|_| ())
    }

    // ========== Status ==========

    /// Get the playback status, including this player's group role
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use bluos_control::{Controller, Settings};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let controller = Controller::new(Settings::default())?;
    /// for player in controller.players(false).await? {
    ///     let status = player.status().await?;
    ///     println!("{}: {:?} at {}%", player.device().display_name(), status.state, status.volume);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let body = self.send(DeviceRequest::get(Endpoint::Status)).await?;
        let mut status = xml::decode_status(&body)?;

        match self.sync_status().await {
            Ok(sync) => status.sync_role = sync.role,
            Err(e) => tracing::debug!("No sync status for {}: {}", self.device.address, e),
        }
        Ok(status)
    }

    /// Get identity and group information
    pub async fn sync_status(&self) -> Result<SyncStatus> {
        let body = self.send(DeviceRequest::get(Endpoint::SyncStatus)).await?;
        xml::decode_sync_status(&body)
    }

    /// Get the uptime shown on the diagnostics page, if the device reports one
    pub async fn uptime(&self) -> Result<Option<String>> {
        let body = self.send(DeviceRequest::get(Endpoint::Diagnostics)).await?;
        Ok(xml::extract_uptime(&body))
    }

    // ========== Transport ==========

    pub async fn play(&self) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::Play)).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::Pause)).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::Stop)).await
    }

    /// Skip to the next track
    pub async fn skip(&self) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::Skip)).await
    }

    /// Go back to the previous track
    pub async fn back(&self) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::Back)).await
    }

    // ========== Volume ==========

    /// Set the volume level (0-100)
    ///
    /// Levels outside the range are rejected before any request is sent.
    pub async fn set_volume(&self, level: i32) -> Result<()> {
        let level = validate::validate_volume(level)?;
        self.command(DeviceRequest::get(Endpoint::Volume).param("level", level))
            .await
    }

    /// Change the volume relative to the current level, clamped to 0-100
    ///
    /// Returns the level that was set.
    pub async fn adjust_volume(&self, delta: i32) -> Result<Volume> {
        let current = self.status().await?.volume;
        let level = validate::clamp_volume(i32::from(current).saturating_add(delta));
        self.command(DeviceRequest::get(Endpoint::Volume).param("level", level))
            .await?;
        Ok(level)
    }

    pub async fn set_mute(&self, mute: bool) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::Volume).param("mute", u8::from(mute)))
            .await
    }

    /// Reset the volume to the configured safe level
    pub async fn reset_volume(&self) -> Result<()> {
        self.set_volume(i32::from(self.safe_volume)).await
    }

    // ========== Queue ==========

    pub async fn queue(&self) -> Result<Vec<QueueItem>> {
        let body = self.send(DeviceRequest::get(Endpoint::Queue)).await?;
        xml::decode_queue(&body)
    }

    pub async fn clear_queue(&self) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::Queue).param("clear", 1).non_idempotent())
            .await
    }

    /// Move the queue entry at `from` to position `to`
    pub async fn move_queue_item(&self, from: u32, to: u32) -> Result<()> {
        self.command(
            DeviceRequest::get(Endpoint::Queue)
                .param("move", from)
                .param("to", to)
                .non_idempotent(),
        )
        .await
    }

    // ========== Inputs ==========

    pub async fn inputs(&self) -> Result<Vec<AudioInput>> {
        let body = self.send(DeviceRequest::get(Endpoint::AudioInputs)).await?;
        xml::decode_inputs(&body)
    }

    /// Select an audio input by name
    pub async fn set_input(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() || name.len() > 128 || name.chars().any(char::is_control) {
            return Err(BluosError::validation(format!("invalid input name {:?}", name)));
        }
        self.command(DeviceRequest::get(Endpoint::AudioInput).param("input", name))
            .await
    }

    pub async fn bluetooth_mode(&self) -> Result<BluetoothMode> {
        let body = self.send(DeviceRequest::get(Endpoint::AudioModes)).await?;
        xml::decode_bluetooth_mode(&body)
    }

    pub async fn set_bluetooth_mode(&self, mode: BluetoothMode) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::SetAudioModes).param("bluetoothAutoplay", mode.code()))
            .await
    }

    // ========== Presets ==========

    pub async fn presets(&self) -> Result<Vec<Preset>> {
        let body = self.send(DeviceRequest::get(Endpoint::Presets)).await?;
        xml::decode_presets(&body)
    }

    pub async fn play_preset(&self, id: u32) -> Result<()> {
        self.command(DeviceRequest::get(Endpoint::Preset).param("id", id))
            .await
    }

    // ========== Grouping ==========

    /// Add `slave` to the group led by this player
    pub async fn add_sync_slave(&self, slave: Ipv4Addr) -> Result<()> {
        validate::check_device_address(slave)?;
        self.command(DeviceRequest::get(Endpoint::Sync).param("slave", slave))
            .await
    }

    /// Remove `slave` from the group led by this player
    pub async fn remove_sync_slave(&self, slave: Ipv4Addr) -> Result<()> {
        validate::check_device_address(slave)?;
        self.command(DeviceRequest::get(Endpoint::Sync).param("remove", slave))
            .await
    }

    // ========== Maintenance ==========

    /// Restart the player software without power cycling
    ///
    /// Sent once; never retried.
    pub async fn soft_reboot(&self) -> Result<()> {
        tracing::info!("Soft rebooting {}", self.device.address);
        self.command(DeviceRequest::post(Endpoint::SoftReboot).param("soft", 1))
            .await
    }

    /// Reboot the device
    ///
    /// Sent once; never retried.
    pub async fn reboot(&self) -> Result<()> {
        tracing::info!("Rebooting {}", self.device.address);
        self.command(DeviceRequest::post(Endpoint::Reboot).param("yes", 1))
            .await
    }
}
