// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Textures and their mip levels.

A [`Texture`] has fixed [`TextureGeometry`] and one device allocation backing every face and
level, allocated on first use.  Each `(face, level)` image has its own [`LevelData`]:

- `NotYetAllocated`: the API layer never specified it, so it has no resolved format
- `Staged`: host-side bytes waiting to be translated into device memory
- `Resident`: the device allocation holds the level's contents

A level is never staged and resident at once; [`translate_level`] moves staged bytes into the
allocation and frees them.

Each image is also an [`Attachable`], created with the texture so a framebuffer can bind it.
*/

use crate::attachment::Attachable;
use crate::context::Context;
use crate::error::Error;
use crate::layout::TextureGeometry;
use crate::sync::SyncObject;
use crate::transfer::fallback;
use crate::transport::{DeviceAllocation, DeviceRegion, Transport};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Host-side state of one mip level.
#[derive(Clone, PartialEq, Eq)]
pub enum LevelData {
    NotYetAllocated,
    Staged(Vec<u8>),
    Resident,
}

impl Debug for LevelData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelData::NotYetAllocated => f.write_str("NotYetAllocated"),
            LevelData::Staged(bytes) => write!(f, "Staged({} bytes)", bytes.len()),
            LevelData::Resident => f.write_str("Resident"),
        }
    }
}

/// [`LevelData`] without the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    NotYetAllocated,
    Staged,
    Resident,
}

impl From<&LevelData> for Residency {
    fn from(data: &LevelData) -> Self {
        match data {
            LevelData::NotYetAllocated => Residency::NotYetAllocated,
            LevelData::Staged(_) => Residency::Staged,
            LevelData::Resident => Residency::Resident,
        }
    }
}

#[derive(Debug)]
struct TextureStorage {
    allocation: Option<DeviceAllocation>,
    levels: Vec<LevelData>,
}

pub struct Texture {
    name: u32,
    geometry: TextureGeometry,
    sync: Arc<SyncObject>,
    sync_override: Mutex<Option<Arc<SyncObject>>>,
    render_target_uses: AtomicU32,
    storage: Mutex<TextureStorage>,
    attachables: Box<[Arc<Attachable>]>,
}

impl Texture {
    /// Creates a texture with every level unspecified and no device memory.
    pub fn new(name: u32, geometry: TextureGeometry) -> Arc<Texture> {
        debug_assert!(geometry.levels > 0, "texture without levels");
        debug_assert!(geometry.faces == 1 || geometry.faces == 6, "faces must be 1 or 6");
        Arc::new_cyclic(|weak| {
            let attachables = (0..geometry.faces)
                .flat_map(|face| (0..geometry.levels).map(move |level| (face, level)))
                .map(|(face, level)| Attachable::texture_level(name, weak.clone(), face, level))
                .collect();
            Texture {
                name,
                geometry,
                sync: SyncObject::new(),
                sync_override: Mutex::new(None),
                render_target_uses: AtomicU32::new(0),
                storage: Mutex::new(TextureStorage {
                    allocation: None,
                    levels: vec![LevelData::NotYetAllocated; geometry.image_count()],
                }),
                attachables,
            }
        })
    }

    pub fn name(&self) -> u32 {
        self.name
    }

    pub fn geometry(&self) -> &TextureGeometry {
        &self.geometry
    }

    fn index(&self, face: u32, level: u32) -> Option<usize> {
        (face < self.geometry.faces && level < self.geometry.levels)
            .then(|| (face * self.geometry.levels + level) as usize)
    }

    fn storage(&self) -> MutexGuard<'_, TextureStorage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The attachable for `(face, level)`.
    pub fn attachable(&self, face: u32, level: u32) -> Option<Arc<Attachable>> {
        self.index(face, level).map(|i| self.attachables[i].clone())
    }

    pub fn residency(&self, face: u32, level: u32) -> Option<Residency> {
        let index = self.index(face, level)?;
        Some(Residency::from(&self.storage().levels[index]))
    }

    /// Whether the API layer has given the level a format and contents.
    pub fn is_specified(&self, face: u32, level: u32) -> bool {
        self.residency(face, level)
            .is_some_and(|residency| residency != Residency::NotYetAllocated)
    }

    /**
    Specifies a level's contents.

    `Some(bytes)` stages tightly packed rows for a later [`translate_level`]; `None` declares the
    level with undefined contents.  The first specification gives the level a resolved format,
    which changes the completeness of any framebuffer it is bound to.
    */
    pub fn specify_level(&self, face: u32, level: u32, data: Option<Vec<u8>>) -> Result<(), Error> {
        let index = self
            .index(face, level)
            .ok_or(Error::LevelNotSpecified { face, level })?;
        let was_unspecified = {
            let mut storage = self.storage();
            let previous = std::mem::replace(
                &mut storage.levels[index],
                match data {
                    Some(bytes) => LevelData::Staged(bytes),
                    None => LevelData::Resident,
                },
            );
            previous == LevelData::NotYetAllocated
        };
        if was_unspecified {
            self.attachables[index].bump_generation();
        }
        Ok(())
    }

    pub(crate) fn take_staged(&self, face: u32, level: u32) -> Option<Vec<u8>> {
        let index = self.index(face, level)?;
        let mut storage = self.storage();
        match std::mem::replace(&mut storage.levels[index], LevelData::Resident) {
            LevelData::Staged(bytes) => Some(bytes),
            other => {
                storage.levels[index] = other;
                None
            }
        }
    }

    /// Puts bytes taken with [`Self::take_staged`] back after a failed translation.
    pub(crate) fn restage(&self, face: u32, level: u32, bytes: Vec<u8>) {
        if let Some(index) = self.index(face, level) {
            self.storage().levels[index] = LevelData::Staged(bytes);
        }
    }

    pub fn allocation(&self) -> Option<DeviceAllocation> {
        self.storage().allocation.clone()
    }

    /// Returns the device allocation, allocating it on first use.
    pub fn ensure_allocation(&self, transport: &dyn Transport) -> Result<DeviceAllocation, Error> {
        let mut storage = self.storage();
        if let Some(allocation) = &storage.allocation {
            return Ok(allocation.clone());
        }
        let bytes = self.geometry.total_byte_size();
        let allocation = transport
            .allocate(bytes, "texture")
            .map_err(|e| Error::from_allocation(e, "texture"))?;
        logwise::debuginternal_sync!(
            "texture {name} allocated {bytes} bytes",
            name = self.name,
            bytes = bytes
        );
        storage.allocation = Some(allocation.clone());
        Ok(allocation)
    }

    /**
    Swaps the backing allocation for one supplied by an image-sharing collaborator.

    Every attachable of the texture is marked stale so the framebuffers using it re-link their
    surfaces at the next completeness query.  `sync`, when given, replaces the sync object
    hardware work on the texture is tracked against.  Returns the old allocation, which the
    caller owns.
    */
    pub fn replace_allocation(
        &self,
        allocation: DeviceAllocation,
        sync: Option<Arc<SyncObject>>,
    ) -> Option<DeviceAllocation> {
        debug_assert!(
            allocation.size >= self.geometry.total_byte_size(),
            "replacement allocation is too small"
        );
        let previous = self.storage().allocation.replace(allocation);
        if sync.is_some() {
            self.set_sync_override(sync);
        }
        for attachable in self.attachables.iter() {
            attachable.mark_ghosted();
        }
        logwise::info_sync!("texture {name} backing replaced", name = self.name);
        previous
    }

    /// Where `(face, level)` lives in device memory, if the texture has been allocated.
    pub fn level_region(&self, face: u32, level: u32) -> Option<DeviceRegion> {
        self.index(face, level)?;
        let allocation = self.allocation()?;
        Some(DeviceRegion {
            allocation,
            offset: self.geometry.level_byte_offset(face, level),
        })
    }

    /// The sync object tracking hardware access to the texture.
    pub fn sync(&self) -> Arc<SyncObject> {
        let guard = self.sync_override.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone().unwrap_or_else(|| self.sync.clone())
    }

    pub fn sync_override(&self) -> Option<Arc<SyncObject>> {
        self.sync_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs the sync object of an image this texture is the source of, or clears it.
    pub fn set_sync_override(&self, sync: Option<Arc<SyncObject>>) {
        *self.sync_override.lock().unwrap_or_else(PoisonError::into_inner) = sync;
    }

    /// Number of render surfaces currently built over the texture's levels.
    pub fn render_target_uses(&self) -> u32 {
        self.render_target_uses.load(Ordering::Acquire)
    }

    pub(crate) fn add_render_target_use(&self) {
        self.render_target_uses.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn remove_render_target_use(&self) {
        let previous = self.render_target_uses.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "texture render target use count underflow");
    }
}

impl Debug for Texture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage();
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("geometry", &self.geometry)
            .field("allocation", &storage.allocation.as_ref().map(|a| a.address))
            .field("levels", &storage.levels)
            .field("render_target_uses", &self.render_target_uses())
            .finish()
    }
}

/**
Forces `(face, lod)` into hardware-resident form.

Staged bytes are converted with the context's codec into the texture allocation and freed.  A
level that is already resident is left alone; one that was never specified is an error.
*/
pub fn translate_level(ctx: &Context, texture: &Texture, face: u32, lod: u32) -> Result<(), Error> {
    match texture.residency(face, lod) {
        None | Some(Residency::NotYetAllocated) => {
            return Err(Error::LevelNotSpecified { face, level: lod });
        }
        Some(Residency::Resident) => return Ok(()),
        Some(Residency::Staged) => {}
    }
    texture.ensure_allocation(ctx.transport())?;
    let Some(bytes) = texture.take_staged(face, lod) else {
        //another thread translated it first
        return Ok(());
    };
    let geometry = texture.geometry();
    let extent = geometry.level_extent(lod);
    let source = fallback::SourceRows {
        bytes: &bytes,
        format: geometry.format,
        stride: fallback::packed_row_bytes(geometry.format, extent.width),
    };
    match fallback::write_level_region(ctx, texture, (face, lod), extent.full_rect(), source) {
        Ok(()) => {
            logwise::trace_sync!(
                "translated texture {name} face {face} level {lod}",
                name = texture.name(),
                face = face,
                lod = lod
            );
            Ok(())
        }
        Err(e) => {
            texture.restage(face, lod, bytes);
            Err(e)
        }
    }
}
