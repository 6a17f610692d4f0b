//! Keyed list module
//!
//! An ordered list of items identified by a key function. Items are kept in
//! one state cell; per-key lookups are separate query instances, so a reader
//! of one item is only notified when that item changes.

use domus_core::{Argument, Command, DomainBuilder, Query, State, Value};
use std::sync::Arc;

type KeyFn<K, T> = dyn Fn(&T) -> K + Send + Sync;

/// Entities declared by [`list_module`]
pub struct ListModule<K, T> {
    pub items: State<Vec<T>>,
    pub key_list: Query<(), Vec<K>>,
    /// One instance per key read. Instances read only through
    /// [`Store::query`](domus_core::Store::query) stay cached until the
    /// domain is torn down, so hosts reading many distinct keys should
    /// subscribe instead and drop the subscription when done.
    pub item: Query<K, Option<T>>,
    pub item_list: Query<(), Vec<T>>,
    pub size: Query<(), usize>,
    /// Replace the whole list
    pub set_list: Command<Vec<T>>,
    /// Append an item, replacing in place an item with the same key
    pub add_item: Command<T>,
    pub add_items: Command<Vec<T>>,
    /// Replace the item with the same key; unknown keys are ignored
    pub update_item: Command<T>,
    pub delete_item: Command<K>,
    pub delete_items: Command<Vec<K>>,
    /// Insert at a position, clamped to the list length; an item with the
    /// same key is moved rather than duplicated
    pub insert_at: Command<(usize, T)>,
    pub clear: Command<()>,
}

impl<K, T> Clone for ListModule<K, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, T> Copy for ListModule<K, T> {}

impl<K, T> std::fmt::Debug for ListModule<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListModule")
            .field("items", &self.items)
            .field("item", &self.item)
            .finish()
    }
}

fn position<K: PartialEq, T>(items: &[T], key_fn: &KeyFn<K, T>, key: &K) -> Option<usize> {
    items.iter().position(|item| key_fn(item) == *key)
}

fn upsert<K: PartialEq, T>(items: &mut Vec<T>, key_fn: &KeyFn<K, T>, item: T) {
    match position(items, key_fn, &key_fn(&item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

/// Declare a keyed list named `name` inside the domain being built
pub fn list_module<K, T, F>(
    d: &mut DomainBuilder<'_>,
    name: &str,
    key_fn: F,
    default: Vec<T>,
) -> ListModule<K, T>
where
    K: Argument + Clone + PartialEq,
    T: Value + Clone + PartialEq,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    let key_fn: Arc<KeyFn<K, T>> = Arc::new(key_fn);
    let items = d.state(&format!("{name}.Items"), default);

    let keys = Arc::clone(&key_fn);
    let key_list = d.query(&format!("{name}.KeyList"), move |ctx, _: &()| {
        Ok(ctx.get(items)?.iter().map(|item| keys(item)).collect::<Vec<K>>())
    });
    let keys = Arc::clone(&key_fn);
    let item = d.query(&format!("{name}.Item"), move |ctx, key: &K| {
        let items = ctx.get(items)?;
        Ok(position(&items, &*keys, key).map(|index| items[index].clone()))
    });
    let item_list = d.query(&format!("{name}.ItemList"), move |ctx, _: &()| ctx.get(items));
    let size = d.query(&format!("{name}.Size"), move |ctx, _: &()| Ok(ctx.get(items)?.len()));

    let set_list = d.command(&format!("{name}.SetList"), move |_, list: Vec<T>| {
        Ok(vec![items.set(list)])
    });

    let keys = Arc::clone(&key_fn);
    let add_item = d.command(&format!("{name}.AddItem"), move |ctx, item: T| {
        let mut list = ctx.get(items)?;
        upsert(&mut list, &*keys, item);
        Ok(vec![items.set(list)])
    });

    let keys = Arc::clone(&key_fn);
    let add_items = d.command(&format!("{name}.AddItems"), move |ctx, new: Vec<T>| {
        let mut list = ctx.get(items)?;
        for item in new {
            upsert(&mut list, &*keys, item);
        }
        Ok(vec![items.set(list)])
    });

    let keys = Arc::clone(&key_fn);
    let list_name = name.to_string();
    let update_item = d.command(&format!("{name}.UpdateItem"), move |ctx, item: T| {
        let mut list = ctx.get(items)?;
        let key = keys(&item);
        match position(&list, &*keys, &key) {
            Some(index) => list[index] = item,
            None => {
                tracing::debug!(list = %list_name, key = ?key, "update of unknown item ignored");
                return Ok(Vec::new());
            }
        }
        Ok(vec![items.set(list)])
    });

    let keys = Arc::clone(&key_fn);
    let delete_item = d.command(&format!("{name}.DeleteItem"), move |ctx, key: K| {
        let mut list = ctx.get(items)?;
        list.retain(|item| keys(item) != key);
        Ok(vec![items.set(list)])
    });

    let keys = Arc::clone(&key_fn);
    let delete_items = d.command(&format!("{name}.DeleteItems"), move |ctx, doomed: Vec<K>| {
        let mut list = ctx.get(items)?;
        list.retain(|item| !doomed.contains(&keys(item)));
        Ok(vec![items.set(list)])
    });

    let keys = Arc::clone(&key_fn);
    let insert_at = d.command(&format!("{name}.InsertAt"), move |ctx, (index, item): (usize, T)| {
        let mut list = ctx.get(items)?;
        let key = keys(&item);
        list.retain(|existing| keys(existing) != key);
        let index = index.min(list.len());
        list.insert(index, item);
        Ok(vec![items.set(list)])
    });

    let clear = d.command(&format!("{name}.Clear"), move |_, ()| Ok(vec![items.set(Vec::new())]));

    ListModule {
        items,
        key_list,
        item,
        item_list,
        size,
        set_list,
        add_item,
        add_items,
        update_item,
        delete_item,
        delete_items,
        insert_at,
        clear,
    }
}
