//! The object tree and property tables.
//!
//! The object table is a 31-entry default-property table followed by
//! 9-byte object entries indexed from 1: four attribute bytes, parent,
//! sibling and child numbers, and the address of the property block.
//! Property entries carry their number and size in a one-byte header and
//! are listed in descending number order.

use log::debug;

use crate::error::{Error, Result};
use crate::story::Story;

pub const DEFAULT_PROPERTY_COUNT: u16 = 31;
pub const OBJECT_ENTRY_SIZE: usize = 9;
pub const MAX_ATTRIBUTE: u16 = 31;

impl Story {
    fn object_tree_base(&self) -> Result<usize> {
        Ok(self.object_table_base()? + DEFAULT_PROPERTY_COUNT as usize * 2)
    }

    /// The object count is not stored in the image; it is derived from the
    /// assumption that object 1's property block immediately follows the
    /// object entries. Shipped v3 files lay themselves out this way, but
    /// nothing in the format requires it.
    pub fn object_count(&self) -> Result<u16> {
        let tree = self.object_tree_base()?;
        let first_props = self.read_word(tree + 7)? as usize;
        Ok(((first_props - tree) / OBJECT_ENTRY_SIZE) as u16)
    }

    fn object_entry_addr(&self, object: u16) -> Result<usize> {
        if object == 0 || object > self.object_count()? {
            return Err(Error::InvalidObject(object));
        }
        Ok(self.object_tree_base()? + (object as usize - 1) * OBJECT_ENTRY_SIZE)
    }

    pub fn object_parent(&self, object: u16) -> Result<u16> {
        Ok(self.read_byte(self.object_entry_addr(object)? + 4)? as u16)
    }

    pub fn object_sibling(&self, object: u16) -> Result<u16> {
        Ok(self.read_byte(self.object_entry_addr(object)? + 5)? as u16)
    }

    pub fn object_child(&self, object: u16) -> Result<u16> {
        Ok(self.read_byte(self.object_entry_addr(object)? + 6)? as u16)
    }

    fn object_set_relation(&self, object: u16, offset: usize, value: u16) -> Result<Story> {
        if value > 255 {
            return Err(Error::InvalidObject(value));
        }
        let addr = self.object_entry_addr(object)?;
        self.write_byte(addr + offset, value as u8)
    }

    pub fn object_set_parent(&self, object: u16, parent: u16) -> Result<Story> {
        self.object_set_relation(object, 4, parent)
    }

    pub fn object_set_sibling(&self, object: u16, sibling: u16) -> Result<Story> {
        self.object_set_relation(object, 5, sibling)
    }

    pub fn object_set_child(&self, object: u16, child: u16) -> Result<Story> {
        self.object_set_relation(object, 6, child)
    }

    /// Attribute bits are numbered from the most significant bit of the
    /// first attribute byte.
    fn attribute_location(&self, object: u16, attribute: u16) -> Result<(usize, u8)> {
        if attribute > MAX_ATTRIBUTE {
            return Err(Error::InvalidAttribute(attribute));
        }
        let addr = self.object_entry_addr(object)? + attribute as usize / 8;
        let mask = 0x80 >> (attribute % 8);
        Ok((addr, mask))
    }

    pub fn object_attribute(&self, object: u16, attribute: u16) -> Result<bool> {
        let (addr, mask) = self.attribute_location(object, attribute)?;
        Ok(self.read_byte(addr)? & mask != 0)
    }

    pub fn object_set_attribute(&self, object: u16, attribute: u16) -> Result<Story> {
        let (addr, mask) = self.attribute_location(object, attribute)?;
        let byte = self.read_byte(addr)?;
        self.write_byte(addr, byte | mask)
    }

    pub fn object_clear_attribute(&self, object: u16, attribute: u16) -> Result<Story> {
        let (addr, mask) = self.attribute_location(object, attribute)?;
        let byte = self.read_byte(addr)?;
        self.write_byte(addr, byte & !mask)
    }

    pub fn object_properties_addr(&self, object: u16) -> Result<usize> {
        Ok(self.read_word(self.object_entry_addr(object)? + 7)? as usize)
    }

    /// The object's short name from the head of its property block.
    pub fn object_name(&self, object: u16) -> Result<String> {
        let block = self.object_properties_addr(object)?;
        if self.read_byte(block)? == 0 {
            return Ok(String::new());
        }
        let (name, _) = self.decode_string(block + 1)?;
        Ok(name)
    }

    fn first_property_addr(&self, object: u16) -> Result<usize> {
        let block = self.object_properties_addr(object)?;
        let name_words = self.read_byte(block)? as usize;
        Ok(block + 1 + 2 * name_words)
    }

    /// Decode one property header: number, data size and data address.
    /// `None` at the terminating zero byte.
    fn property_at(&self, addr: usize) -> Result<Option<(u8, usize, usize)>> {
        let header = self.read_byte(addr)?;
        if header == 0 {
            return Ok(None);
        }
        let number = header & 0x1F;
        let size = ((header >> 5) & 0x07) as usize + 1;
        Ok(Some((number, size, addr + 1)))
    }

    /// Walk to a property, if the object has it.
    fn find_property(&self, object: u16, property: u8) -> Result<Option<(usize, usize)>> {
        let mut addr = self.first_property_addr(object)?;
        while let Some((number, size, data)) = self.property_at(addr)? {
            if number == property {
                return Ok(Some((data, size)));
            }
            if number < property {
                break; // properties are listed in descending order
            }
            addr = data + size;
        }
        Ok(None)
    }

    pub fn default_property(&self, property: u8) -> Result<u16> {
        if property == 0 || property as u16 > DEFAULT_PROPERTY_COUNT {
            return Err(Error::InvalidDefaultProperty(property));
        }
        self.read_word(self.object_table_base()? + (property as usize - 1) * 2)
    }

    /// A property's value: its own 1- or 2-byte data when present, the
    /// table default otherwise.
    pub fn property_value(&self, object: u16, property: u8) -> Result<u16> {
        match self.find_property(object, property)? {
            Some((data, 1)) => Ok(self.read_byte(data)? as u16),
            Some((data, 2)) => self.read_word(data),
            Some(_) => Err(Error::InvalidProperty { object, property }),
            None => self.default_property(property),
        }
    }

    /// The address of a property's data, or 0 when the object lacks it.
    pub fn property_data_addr(&self, object: u16, property: u8) -> Result<u16> {
        match self.find_property(object, property)? {
            Some((data, _)) => Ok(data as u16),
            None => Ok(0),
        }
    }

    /// Data length for a property found through `property_data_addr`; the
    /// header byte sits just before the data. Address 0 reports length 0.
    pub fn property_length_at(&self, data_addr: u16) -> Result<u16> {
        if data_addr == 0 {
            return Ok(0);
        }
        let header = self.read_byte(data_addr as usize - 1)?;
        Ok(((header >> 5) & 0x07) as u16 + 1)
    }

    /// The next property number after `property` in the object's list, or
    /// the first when `property` is 0; 0 at the end of the list.
    pub fn next_property(&self, object: u16, property: u8) -> Result<u16> {
        if property == 0 {
            let addr = self.first_property_addr(object)?;
            return Ok(self.property_at(addr)?.map_or(0, |(n, _, _)| n as u16));
        }
        match self.find_property(object, property)? {
            Some((data, size)) => Ok(self
                .property_at(data + size)?
                .map_or(0, |(n, _, _)| n as u16)),
            None => Err(Error::InvalidProperty { object, property }),
        }
    }

    /// Overwrite a property the object already has. Only 1- and 2-byte
    /// properties can be written; a 1-byte write keeps the value's low byte.
    pub fn put_property(&self, object: u16, property: u8, value: u16) -> Result<Story> {
        match self.find_property(object, property)? {
            Some((data, 1)) => self.write_byte(data, (value & 0xFF) as u8),
            Some((data, 2)) => self.write_word(data, value),
            Some(_) | None => Err(Error::InvalidProperty { object, property }),
        }
    }

    /// Detach an object from its parent; parent and sibling become 0.
    pub fn remove_object(&self, object: u16) -> Result<Story> {
        let parent = self.object_parent(object)?;
        let story = if parent == 0 {
            self.clone()
        } else {
            let next = self.object_sibling(object)?;
            let first = self.object_child(parent)?;
            if first == object {
                self.object_set_child(parent, next)?
            } else {
                let mut cursor = first;
                let mut story = self.clone();
                loop {
                    if cursor == 0 {
                        debug!("object {} missing from parent {}'s child list", object, parent);
                        break;
                    }
                    let sibling = self.object_sibling(cursor)?;
                    if sibling == object {
                        story = self.object_set_sibling(cursor, next)?;
                        break;
                    }
                    cursor = sibling;
                }
                story
            }
        };
        story
            .object_set_parent(object, 0)?
            .object_set_sibling(object, 0)
    }

    /// Move an object to the head of another object's child list.
    pub fn insert_object(&self, object: u16, destination: u16) -> Result<Story> {
        if destination == 0 {
            return Err(Error::InvalidObject(destination));
        }
        let story = self.remove_object(object)?;
        let first = story.object_child(destination)?;
        story
            .object_set_sibling(object, first)?
            .object_set_child(destination, object)?
            .object_set_parent(object, destination)
    }
}
